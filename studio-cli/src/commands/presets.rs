//! Presets command

use studio_core::Resolution;

/// List the canvas resolutions
pub fn presets() {
    println!("Studio - Canvas Resolutions\n");
    println!("{:<10} {:<12}", "Name", "Canvas");
    println!("{}", "-".repeat(22));

    for res in Resolution::ALL {
        let marker = if res == Resolution::default() {
            " (default)"
        } else {
            ""
        };
        println!(
            "{:<10} {:<12}{}",
            res.name(),
            format!("{}x{}", res.width(), res.height()),
            marker
        );
    }
}
