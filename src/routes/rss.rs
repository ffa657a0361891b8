use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};

use crate::db::models::BlogPost;
use crate::error::AppError;
use crate::query::{Pagination, Visibility};
use crate::state::AppState;
use crate::store::BlogQuery;

const FEED_SIZE: i64 = 50;

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn rfc822(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S +0000").to_string()
}

fn render_item(base_url: &str, post: &BlogPost) -> String {
    let post_url = format!("{}/blog/{}", base_url, post.url_slug);
    let published = post.publish_date.unwrap_or(post.created_at);
    let mut categories = String::new();
    for category in post.category.iter().chain(post.tags.iter()) {
        categories.push_str(&format!("      <category>{}</category>\n", escape_xml(category)));
    }
    format!(
        "    <item>\n\
               <title>{}</title>\n\
               <link>{}</link>\n\
               <description>{}</description>\n\
         {}\
               <pubDate>{}</pubDate>\n\
               <guid isPermaLink=\"true\">{}</guid>\n\
             </item>\n",
        escape_xml(&post.title),
        escape_xml(&post_url),
        escape_xml(post.summary.as_deref().unwrap_or("")),
        categories,
        rfc822(&published),
        escape_xml(&post_url),
    )
}

/// GET /api/blog/rss.xml
pub async fn rss_feed(State(state): State<AppState>) -> Result<Response, AppError> {
    let query = BlogQuery {
        visibility: Visibility::PublishedOnly,
        category: None,
        tag: None,
        search: None,
        pagination: Pagination::new(Some(1), Some(FEED_SIZE)),
    };
    let posts = state.blog.list(&query).await?.items;

    let config = &state.config;
    let base_url = config.site_url.trim_end_matches('/');
    let items: String = posts.iter().map(|p| render_item(base_url, p)).collect();

    let feed_url = format!("{}/api/blog/rss.xml", base_url);
    let blog_url = format!("{}/blog", base_url);

    let xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom">
  <channel>
    <title>{}</title>
    <link>{}</link>
    <description>{}</description>
    <atom:link href="{}" rel="self" type="application/rss+xml"/>
    <lastBuildDate>{}</lastBuildDate>
{}  </channel>
</rss>"#,
        escape_xml(&config.site_title),
        escape_xml(&blog_url),
        escape_xml(&config.site_description),
        escape_xml(&feed_url),
        posts
            .first()
            .map(|p| rfc822(&p.publish_date.unwrap_or(p.created_at)))
            .unwrap_or_default(),
        items,
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/rss+xml; charset=utf-8"),
            (
                header::CACHE_CONTROL,
                "public, max-age=3600, stale-while-revalidate=600",
            ),
        ],
        xml,
    )
        .into_response())
}
