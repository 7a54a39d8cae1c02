//! Forward `LORASENSE_*` settings to the compiler.
//!
//! Values come from the environment, or from a `.env` file next to this
//! crate. They are baked into the image and read back with `option_env!` in
//! `src/config.rs`.

use std::env;

use lorasense_core::config::{CONFIG_KEYS, ENV_PREFIX};

fn main() {
    println!("cargo:rerun-if-changed=.env");

    match dotenvy::dotenv() {
        Ok(path) => println!("cargo:warning=Loaded settings from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => println!("cargo:warning=Ignoring unreadable .env file: {e}"),
    }

    for key in CONFIG_KEYS {
        let name = format!("{ENV_PREFIX}{key}");
        println!("cargo:rerun-if-env-changed={name}");
        if let Ok(value) = env::var(&name) {
            println!("cargo:rustc-env={name}={value}");
        }
    }

    for (name, _) in env::vars() {
        if let Some(key) = name.strip_prefix(ENV_PREFIX)
            && !CONFIG_KEYS.contains(&key)
        {
            println!("cargo:warning=Unknown setting {name} is ignored");
        }
    }
}
