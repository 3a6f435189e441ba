use crate::config::LayoutConfig;
use crate::ir::{Dimensions, GraphNode};

/// Width of the widest label line using the configured average glyph width.
pub(super) fn label_width(text: &str, config: &LayoutConfig) -> f32 {
    let longest = text
        .lines()
        .map(|line| line.chars().count())
        .max()
        .unwrap_or(0);
    longest as f32 * config.char_width
}

/// Leaf size for a node. Custom dimensions always win; otherwise the label
/// decides the width, bounded by the width multiplier.
pub(super) fn node_size(node: &GraphNode, full_labels: bool, config: &LayoutConfig) -> Dimensions {
    if let Some(custom) = node.custom_dimensions.filter(Dimensions::is_valid) {
        return custom;
    }
    let label = node.display_label(full_labels);
    let wanted = label_width(label, config) + config.node_padding_x * 2.0;
    let cap = config.node_min_width * config.max_width_multiplier.max(1.0);
    let width = wanted.max(config.node_min_width).min(cap);
    let lines = label.lines().count().max(1) as f32;
    // Labels wider than the cap wrap onto extra lines.
    let wrapped = if wanted > cap {
        (wanted / cap).ceil() - 1.0
    } else {
        0.0
    };
    let height = config.node_height * (lines + wrapped);
    Dimensions::new(width, height)
}

pub(super) fn collapsed_container_size(config: &LayoutConfig) -> Dimensions {
    Dimensions::new(
        config.collapsed_container_width,
        config.collapsed_container_height,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::NodeSpec;

    #[test]
    fn short_labels_use_minimum_width() {
        let config = LayoutConfig::default();
        let node = NodeSpec::new("n").with_label("ab").into_node();
        let size = node_size(&node, false, &config);
        assert_eq!(size, Dimensions::new(config.node_min_width, config.node_height));
    }

    #[test]
    fn long_labels_are_capped() {
        let config = LayoutConfig::default();
        let node = NodeSpec::new("n").with_label("x".repeat(400)).into_node();
        let size = node_size(&node, false, &config);
        assert_eq!(size.width, config.node_min_width * config.max_width_multiplier);
        assert!(size.height > config.node_height);
    }

    #[test]
    fn full_labels_widen_nodes() {
        let config = LayoutConfig::default();
        let node = NodeSpec::new("n")
            .with_label("map")
            .with_full_label("map(|item| transform(item))")
            .into_node();
        let short = node_size(&node, false, &config);
        let full = node_size(&node, true, &config);
        assert!(full.width > short.width);
    }

    #[test]
    fn custom_dimensions_win() {
        let config = LayoutConfig::default();
        let node = NodeSpec::new("n").with_dimensions(33.0, 44.0).into_node();
        assert_eq!(node_size(&node, false, &config), Dimensions::new(33.0, 44.0));
    }
}
