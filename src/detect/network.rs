//! Network configuration (darknet `.cfg` layout).
//!
//! The config is an INI-like list of sections. `[net]` carries the input
//! geometry; every following section is one layer, numbered from zero. The
//! detection heads (`[yolo]`, `[region]`, `[detection]`) are the network's
//! unconnected output layers and are named `{type}_{layer_index}`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

const DEFAULT_INPUT_SIZE: u32 = 416;
const OUTPUT_SECTIONS: [&str; 3] = ["yolo", "region", "detection"];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    /// Class count declared by the detection heads, if any.
    pub classes: Option<usize>,
    /// Output layer identifiers, resolved once at parse time.
    pub output_layers: Vec<String>,
}

impl NetworkConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read network config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse network config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let sections = split_sections(text)?;
        let (head, layers) = sections
            .split_first()
            .ok_or_else(|| anyhow!("network config has no sections"))?;
        if head.name != "net" && head.name != "network" {
            return Err(anyhow!(
                "network config must start with [net], found [{}]",
                head.name
            ));
        }

        let width = head.parse_u32("width")?.unwrap_or(DEFAULT_INPUT_SIZE);
        let height = head.parse_u32("height")?.unwrap_or(DEFAULT_INPUT_SIZE);
        let channels = head.parse_u32("channels")?.unwrap_or(3);
        if width == 0 || height == 0 || channels == 0 {
            return Err(anyhow!(
                "network input must be non-empty, got {}x{}x{}",
                width,
                height,
                channels
            ));
        }

        let mut output_layers = Vec::new();
        let mut classes = None;
        for (layer_index, layer) in layers.iter().enumerate() {
            if !OUTPUT_SECTIONS.contains(&layer.name.as_str()) {
                continue;
            }
            output_layers.push(format!("{}_{}", layer.name, layer_index));
            if let Some(count) = layer.parse_u32("classes")? {
                let count = count as usize;
                match classes {
                    Some(previous) if previous != count => {
                        return Err(anyhow!(
                            "output layers disagree on class count ({} vs {})",
                            previous,
                            count
                        ))
                    }
                    _ => classes = Some(count),
                }
            }
        }
        if output_layers.is_empty() {
            return Err(anyhow!("network config declares no output layers"));
        }

        Ok(Self {
            width,
            height,
            channels,
            classes,
            output_layers,
        })
    }

    /// Same network, fed at a different input size.
    pub fn with_input_size(mut self, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("network input must be non-empty, got {}x{}", width, height));
        }
        self.width = width;
        self.height = height;
        Ok(self)
    }
}

struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn parse_u32(&self, key: &str) -> Result<Option<u32>> {
        self.get(key)
            .map(|value| {
                value
                    .parse::<u32>()
                    .map_err(|_| anyhow!("[{}] {}={} is not an integer", self.name, key, value))
            })
            .transpose()
    }
}

fn split_sections(text: &str) -> Result<Vec<Section>> {
    let mut sections: Vec<Section> = Vec::new();
    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            sections.push(Section {
                name: name.trim().to_lowercase(),
                entries: Vec::new(),
            });
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| anyhow!("line {}: expected key=value, got '{}'", line_no + 1, line))?;
        let section = sections
            .last_mut()
            .ok_or_else(|| anyhow!("line {}: entry outside of any section", line_no + 1))?;
        section
            .entries
            .push((key.trim().to_lowercase(), value.trim().to_string()));
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TINY_CFG: &str = "\
[net]
# Testing
batch=1
width=416
height=416
channels=3

[convolutional]
filters=255
size=1

[yolo]
mask = 3,4,5
classes=80

[route]
layers = -4

[convolutional]
filters=255

[yolo]
mask = 0,1,2
classes=80
";

    #[test]
    fn resolves_output_layers_by_layer_index() -> Result<()> {
        let cfg = NetworkConfig::parse(TINY_CFG)?;
        assert_eq!((cfg.width, cfg.height, cfg.channels), (416, 416, 3));
        assert_eq!(cfg.classes, Some(80));
        assert_eq!(cfg.output_layers, vec!["yolo_1", "yolo_4"]);
        Ok(())
    }

    #[test]
    fn input_size_defaults_when_missing() -> Result<()> {
        let cfg = NetworkConfig::parse("[net]\n[region]\nclasses=20\n")?;
        assert_eq!((cfg.width, cfg.height), (416, 416));
        assert_eq!(cfg.output_layers, vec!["region_0"]);
        Ok(())
    }

    #[test]
    fn rejects_configs_without_outputs_or_net() {
        assert!(NetworkConfig::parse("[net]\nwidth=416\n[convolutional]\n").is_err());
        assert!(NetworkConfig::parse("[yolo]\nclasses=80\n").is_err());
        assert!(NetworkConfig::parse("width=416\n").is_err());
        assert!(NetworkConfig::parse("[net]\nwidth=abc\n[yolo]\n").is_err());
    }

    #[test]
    fn conflicting_class_counts_are_rejected() {
        let cfg = "[net]\n[yolo]\nclasses=80\n[yolo]\nclasses=20\n";
        assert!(NetworkConfig::parse(cfg).is_err());
    }
}
