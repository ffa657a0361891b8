//! Prints a bcrypt hash for seeding `admin_users.password_hash` or
//! `ADMIN_PASSWORD_HASH`.

use bcrypt::{hash, DEFAULT_COST};
use std::env;

const MIN_PASSWORD_LEN: usize = 8;

fn main() {
    let password = env::args().nth(1).unwrap_or_else(|| {
        eprintln!("Usage: cargo run --bin hash-password <PASSWORD>");
        std::process::exit(1);
    });

    if password.chars().count() < MIN_PASSWORD_LEN {
        eprintln!("Password must be at least {} characters", MIN_PASSWORD_LEN);
        std::process::exit(1);
    }

    match hash(&password, DEFAULT_COST) {
        Ok(hashed) => {
            println!("Cost : {}", DEFAULT_COST);
            println!("Hash : {}\n", hashed);
            println!("# For the no-database fallback login, add to .env:");
            println!("ADMIN_USERNAME=admin");
            println!("ADMIN_PASSWORD_HASH={}\n", hashed);
            println!("# Or seed a database account:");
            println!(
                "INSERT INTO admin_users (username, password_hash, role) VALUES ('admin', '{}', 'admin');",
                hashed
            );
        }
        Err(e) => {
            eprintln!("Error hashing password: {}", e);
            std::process::exit(1);
        }
    }
}
