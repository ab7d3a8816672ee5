use palette::{FromColor, Hsl, Mix, Srgb};

pub fn hsl(h: u16, s: u8, l: u8) -> Srgb {
    let hsl = Hsl::new(h as f32, s as f32 / 100.0, l as f32 / 100.0);
    Srgb::from_color(hsl)
}

pub fn html_color(c: Srgb) -> String {
    let (r, g, b) = c.into_components();
    format!(
        "#{:02x}{:02x}{:02x}",
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8
    )
}

/// Evenly spaced hues for `count` chart series.
pub fn series_color(index: usize, count: usize) -> String {
    let count = count.max(1);
    let hue = (210 + index * 360 / count) % 360;
    html_color(hsl(hue as u16, 65, 50))
}

/// Lighter variant of a series color, used for fills.
pub fn fill_color(index: usize, count: usize) -> String {
    let count = count.max(1);
    let hue = (210 + index * 360 / count) % 360;
    html_color(hsl(hue as u16, 65, 50).mix(hsl(0, 0, 100), 0.7))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_color() {
        assert_eq!(html_color(hsl(0, 0, 100)), "#ffffff");
        assert_eq!(html_color(hsl(0, 0, 0)), "#000000");
        assert_eq!(html_color(hsl(120, 100, 50)), "#00ff00");
    }

    #[test]
    fn test_series_colors_distinct() {
        let colors = (0..3).map(|i| series_color(i, 3)).collect::<Vec<_>>();
        assert_ne!(colors[0], colors[1]);
        assert_ne!(colors[1], colors[2]);
        assert_ne!(colors[0], colors[2]);
    }
}
