use std::env;

// Forwards the settings of a local `.env` so `cargo run` picks them up.
// Variables already set in the environment win over the file.
fn main() {
    println!("cargo:rerun-if-changed=.env");

    let entries = match dotenvy::dotenv_iter() {
        Ok(entries) => entries,
        Err(e) => {
            println!("cargo:warning=No .env loaded: {}", e);
            return;
        }
    };

    for entry in entries {
        let (key, value) = match entry {
            Ok(pair) => pair,
            Err(e) => {
                println!("cargo:warning=Skipping malformed .env line: {}", e);
                continue;
            }
        };

        let value = env::var(&key).unwrap_or(value);
        println!("cargo:rustc-env={}={}", key, value);
        println!("cargo::rerun-if-env-changed={key}");
    }
}
