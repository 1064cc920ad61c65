//! The composite shader library.

use matte_core::{MatteError, MatteResult, ShaderStage};

/// WGSL source for the composite pass.
pub const COMPOSITE_SHADER: &str = include_str!("composite.wgsl");

/// Entry points declared in `source`, in declaration order.
pub fn entry_points(source: &str) -> Vec<(ShaderStage, String)> {
    let mut entries = Vec::new();
    let mut pending: Option<ShaderStage> = None;
    let mut tokens = source.split_whitespace();

    while let Some(token) = tokens.next() {
        match token {
            "@vertex" => pending = Some(ShaderStage::Vertex),
            "@fragment" => pending = Some(ShaderStage::Fragment),
            "fn" => {
                let Some(stage) = pending.take() else {
                    continue;
                };
                if let Some(name) = tokens.next() {
                    let name = name.split('(').next().unwrap_or(name);
                    entries.push((stage, name.to_string()));
                }
            }
            _ => {}
        }
    }
    entries
}

/// Fail unless `source` declares `vertex` and `fragment` for their stages.
pub fn check_entry_points(source: &str, vertex: &str, fragment: &str) -> MatteResult<()> {
    let entries = entry_points(source);
    for (stage, name) in [(ShaderStage::Vertex, vertex), (ShaderStage::Fragment, fragment)] {
        if !entries.iter().any(|(s, n)| *s == stage && n == name) {
            return Err(MatteError::shader_missing(stage, name));
        }
    }
    Ok(())
}
