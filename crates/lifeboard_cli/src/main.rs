//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `lifeboard_core` linkage.
//! - Keep output deterministic for quick local sanity checks.

fn main() {
    println!("lifeboard_core ping={}", lifeboard_core::ping());
    println!("lifeboard_core version={}", lifeboard_core::core_version());
}
