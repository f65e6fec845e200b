//! Build script for unit-bridge
//!
//! The native runtime looks up `nxt_rust_request_handler` in the process image
//! after it is loaded, so binaries must export their dynamic symbols.

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_family = env::var("CARGO_CFG_TARGET_FAMILY").unwrap_or_default();

    match target_os.as_str() {
        // ld64 exports every global symbol of an executable already
        "macos" | "ios" => {}
        _ if target_family == "unix" => {
            println!("cargo:rustc-link-arg-bins=-rdynamic");
        }
        _ => {
            println!(
                "cargo:warning=dynamic symbol export not configured for {}; native runtimes \
                 must be linked against the bridge directly",
                target_os
            );
        }
    }
}
