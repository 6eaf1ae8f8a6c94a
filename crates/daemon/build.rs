// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = std::env::var("OUT_DIR")?;
    let path = std::path::Path::new(&out_dir).join("env_names.rs");
    let mut f = std::fs::File::create(path)?;

    let vars = [
        ("LIFELINE_STATE_DIR", "override the daemon state directory"),
        ("LIFELINE_CONFIG", "override the config file location"),
        ("XDG_STATE_HOME", "XDG base directory for state data"),
    ];

    for (name, doc) in &vars {
        writeln!(f, "/// Environment variable: {doc}.")?;
        writeln!(f, "pub const {name}: &str = \"{name}\";")?;
    }

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
