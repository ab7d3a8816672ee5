use maud::{Markup, html};

use crate::colors::{fill_color, series_color};

pub const WIDTH: f32 = 800.0;
pub const HEIGHT: f32 = 400.0;

const LEFT: f32 = 60.0;
const RIGHT: f32 = 20.0;
const TOP: f32 = 50.0;
const BOTTOM: f32 = 80.0;
const PLOT_W: f32 = WIDTH - LEFT - RIGHT;
const PLOT_H: f32 = HEIGHT - TOP - BOTTOM;
const MAX_X_LABELS: usize = 12;
const FONT: &str = "DejaVu Sans, Arial, Helvetica, sans-serif";
const AXIS_COLOR: &str = "#555555";
const GRID_COLOR: &str = "#e0e0e0";

/// One named series of values, aligned with the chart's categories.
#[derive(Debug, Clone)]
pub struct Series {
    pub name: String,
    pub values: Vec<u64>,
}

/// Tick step and axis maximum covering `max` in at most five steps.
pub fn axis_ticks(max: u64) -> (u64, u64) {
    let step = max.div_ceil(5).max(1);
    let step = match step {
        0..=2 => step,
        3..=5 => 5,
        _ => {
            let magnitude = 10u64.pow(step.ilog10());
            [1, 2, 5, 10]
                .into_iter()
                .map(|m| m * magnitude)
                .find(|&s| s >= step)
                .unwrap_or(step)
        }
    };
    (step, step * max.div_ceil(step).max(1))
}

fn y_pos(value: u64, axis_max: u64) -> f32 {
    TOP + PLOT_H - value as f32 / axis_max as f32 * PLOT_H
}

fn document(title: &str, body: Markup) -> String {
    html! {
        svg xmlns="http://www.w3.org/2000/svg" width=(WIDTH) height=(HEIGHT)
            viewBox=(format!("0 0 {WIDTH} {HEIGHT}")) font-family=(FONT) {
            rect x="0" y="0" width=(WIDTH) height=(HEIGHT) fill="#ffffff" {}
            text x=(WIDTH / 2.0) y="28" text-anchor="middle" font-size="18" font-weight="bold"
                fill="#222222" { (title) }
            (body)
        }
    }
    .into_string()
}

fn y_axis(axis_max: u64, step: u64) -> Markup {
    html! {
        @for tick in (0..=axis_max).step_by(step as usize) {
            @let y = y_pos(tick, axis_max);
            line x1=(LEFT) y1=(y) x2=(LEFT + PLOT_W) y2=(y) stroke=(GRID_COLOR) stroke-width="1" {}
            text x=(LEFT - 8.0) y=(y + 4.0) text-anchor="end" font-size="11" fill=(AXIS_COLOR) {
                (tick)
            }
        }
        line x1=(LEFT) y1=(TOP) x2=(LEFT) y2=(TOP + PLOT_H) stroke=(AXIS_COLOR) stroke-width="1" {}
        line x1=(LEFT) y1=(TOP + PLOT_H) x2=(LEFT + PLOT_W) y2=(TOP + PLOT_H) stroke=(AXIS_COLOR)
            stroke-width="1" {}
    }
}

fn x_label(x: f32, label: &str) -> Markup {
    let y = TOP + PLOT_H + 16.0;
    html! {
        text x=(x) y=(y) text-anchor="end" font-size="11" fill=(AXIS_COLOR)
            transform=(format!("rotate(-35 {x} {y})")) { (label) }
    }
}

fn no_data() -> Markup {
    html! {
        text x=(WIDTH / 2.0) y=(TOP + PLOT_H / 2.0) text-anchor="middle" font-size="14"
            fill=(AXIS_COLOR) { "No data" }
    }
}

/// Line chart of one value per label, e.g. daily activity counts.
pub fn line_chart(title: &str, points: &[(String, u64)]) -> String {
    if points.is_empty() {
        return document(title, no_data());
    }
    let max = points.iter().map(|(_, v)| *v).max().unwrap_or(0);
    let (step, axis_max) = axis_ticks(max);
    let x_pos = |i: usize| {
        if points.len() == 1 {
            LEFT + PLOT_W / 2.0
        } else {
            LEFT + i as f32 / (points.len() - 1) as f32 * PLOT_W
        }
    };
    let coords = points
        .iter()
        .enumerate()
        .map(|(i, (_, v))| (x_pos(i), y_pos(*v, axis_max)))
        .collect::<Vec<_>>();
    let line = coords.iter().map(|(x, y)| format!("{x:.1},{y:.1}")).collect::<Vec<_>>().join(" ");
    let area = format!(
        "{:.1},{:.1} {} {:.1},{:.1}",
        coords[0].0,
        TOP + PLOT_H,
        line,
        coords[coords.len() - 1].0,
        TOP + PLOT_H
    );
    let stride = points.len().div_ceil(MAX_X_LABELS);
    let body = html! {
        (y_axis(axis_max, step))
        polygon points=(area) fill=(fill_color(0, 1)) fill-opacity="0.6" {}
        polyline points=(line) fill="none" stroke=(series_color(0, 1)) stroke-width="2" {}
        @for (x, y) in &coords {
            circle cx=(x) cy=(y) r="3" fill=(series_color(0, 1)) {}
        }
        @for (i, (label, _)) in points.iter().enumerate().step_by(stride) {
            (x_label(x_pos(i), label))
        }
    };
    document(title, body)
}

/// Vertical bar chart with the value printed above each bar.
pub fn bar_chart(title: &str, bars: &[(String, u64)]) -> String {
    if bars.is_empty() {
        return document(title, no_data());
    }
    let max = bars.iter().map(|(_, v)| *v).max().unwrap_or(0);
    let (step, axis_max) = axis_ticks(max);
    let band = PLOT_W / bars.len() as f32;
    let bar_width = band * 0.6;
    let body = html! {
        (y_axis(axis_max, step))
        @for (i, (label, value)) in bars.iter().enumerate() {
            @let x = LEFT + band * i as f32 + (band - bar_width) / 2.0;
            @let y = y_pos(*value, axis_max);
            rect x=(x) y=(y) width=(bar_width) height=(TOP + PLOT_H - y)
                fill=(series_color(i, bars.len())) {}
            text x=(x + bar_width / 2.0) y=(y - 5.0) text-anchor="middle" font-size="12"
                fill="#222222" { (value) }
            (x_label(x + bar_width / 2.0, label))
        }
    };
    document(title, body)
}

/// Bars per category, stacked by series, with a legend.
pub fn stacked_bar_chart(title: &str, categories: &[String], series: &[Series]) -> String {
    if categories.is_empty() || series.is_empty() {
        return document(title, no_data());
    }
    let value = |s: &Series, i: usize| s.values.get(i).copied().unwrap_or(0);
    let totals = (0..categories.len())
        .map(|i| series.iter().map(|s| value(s, i)).sum::<u64>())
        .collect::<Vec<_>>();
    let (step, axis_max) = axis_ticks(totals.iter().copied().max().unwrap_or(0));
    let band = PLOT_W / categories.len() as f32;
    let bar_width = (band * 0.6).min(80.0);
    // (series index, top y, height) per category
    let segments = (0..categories.len())
        .map(|i| {
            let mut base = 0;
            let mut out = Vec::new();
            for (j, s) in series.iter().enumerate() {
                let v = value(s, i);
                if v > 0 {
                    let y_top = y_pos(base + v, axis_max);
                    out.push((j, y_top, y_pos(base, axis_max) - y_top));
                }
                base += v;
            }
            out
        })
        .collect::<Vec<_>>();
    let body = html! {
        (y_axis(axis_max, step))
        @for (i, category) in categories.iter().enumerate() {
            @let x = LEFT + band * i as f32 + (band - bar_width) / 2.0;
            @for &(j, y, height) in &segments[i] {
                rect x=(x) y=(y) width=(bar_width) height=(height)
                    fill=(series_color(j, series.len())) {}
            }
            text x=(x + bar_width / 2.0) y=(y_pos(totals[i], axis_max) - 5.0) text-anchor="middle"
                font-size="12" fill="#222222" { (totals[i]) }
            (x_label(x + bar_width / 2.0, category))
        }
        @for (j, s) in series.iter().enumerate() {
            @let y = TOP + 14.0 * j as f32;
            rect x=(WIDTH - RIGHT - 150.0) y=(y - 9.0) width="10" height="10"
                fill=(series_color(j, series.len())) {}
            text x=(WIDTH - RIGHT - 135.0) y=(y) font-size="11" fill="#222222" { (s.name) }
        }
    };
    document(title, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_ticks() {
        let cases: &[(u64, (u64, u64))] = &[
            (0, (1, 1)),
            (3, (1, 3)),
            (10, (2, 10)),
            (11, (5, 15)),
            (23, (5, 25)),
            (47, (10, 50)),
            (120, (50, 150)),
        ];
        for &(max, expected) in cases {
            assert_eq!(axis_ticks(max), expected, "max: {max}");
        }
    }

    #[test]
    fn test_charts_escape_labels() {
        let bars = vec![("<script>".to_string(), 3), ("b&c".to_string(), 1)];
        let svg = bar_chart("Types", &bars);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("&lt;script&gt;"));
        assert!(svg.contains("b&amp;c"));
        assert!(!svg.contains("<script>"));
    }

    #[test]
    fn test_empty_charts() {
        assert!(line_chart("Trends", &[]).contains("No data"));
        assert!(stacked_bar_chart("Users", &[], &[]).contains("No data"));
    }

    #[test]
    fn test_charts_render() {
        let points =
            (1..=20).map(|d| (format!("2025-03-{d:02}"), d as u64 % 7)).collect::<Vec<_>>();
        let series = vec![
            Series { name: "Pull request".to_string(), values: vec![3, 0] },
            Series { name: "Review".to_string(), values: vec![1, 4] },
        ];
        let categories = vec!["alice".to_string(), "bob".to_string()];
        for svg in [
            line_chart("Trends", &points),
            bar_chart("Types", &[("Review".to_string(), 5)]),
            stacked_bar_chart("Users", &categories, &series),
        ] {
            let png = crate::svg::render_png(&svg).unwrap();
            assert!(!png.is_empty());
        }
    }
}
