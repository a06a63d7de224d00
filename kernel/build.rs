use std::{env, process::Command};

fn main() {
    let _out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");

    let git_hash = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_else(|| "0000000000000000000000000000000000000000".to_string());
    println!("cargo:rustc-env=GIT_HASH={}", git_hash.trim());

    let build_timestamp = Command::new("date")
        .args(["+%s"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_else(|| "0".to_string());
    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_timestamp.trim());

    // Linking against the boot trampoline's linker script is the trampoline's
    // responsibility (out of scope here, see SPEC_FULL.md §1); this crate
    // only needs to be buildable as a freestanding static library the
    // trampoline's own link step pulls in.
}
