//! Build script for the DTU firmware
//!
//! Makes a project-local `memory.x` visible to the linker. The default
//! layout comes from embassy-stm32's `memory-x` feature.

fn main() {
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");

    if let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") {
        println!("cargo:rustc-link-search={dir}");
    }
}
