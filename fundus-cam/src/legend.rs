//! Standalone SVG colorbar for a palette.

use crate::colormap::Palette;
use std::fmt::{self, Write};

const WIDTH: u32 = 480;
const BAR_X: u32 = 40;
const BAR_Y: u32 = 36;
const BAR_W: u32 = 400;
const BAR_H: u32 = 24;
const GRADIENT_STOPS: usize = 21;
const TICKS: [u32; 5] = [0, 25, 50, 75, 100];

fn hex([r, g, b]: [u8; 3]) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Render the legend for `palette`. Depends on nothing but the palette.
pub fn render_legend_svg(palette: Palette) -> String {
    let mut svg = String::new();
    write_legend(&mut svg, palette).expect("writing to a String cannot fail");
    svg
}

fn write_legend(svg: &mut String, palette: Palette) -> fmt::Result {
    let bands = palette.interpretation_bands();
    let height = BAR_Y + BAR_H + 48 + 16 * bands.len() as u32;
    let gradient_id = format!("ramp-{}", palette.name());

    writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{height}" viewBox="0 0 {WIDTH} {height}" font-family="sans-serif">"#
    )?;
    writeln!(svg, r#"  <rect width="100%" height="100%" fill="white"/>"#)?;
    writeln!(svg, "  <defs>")?;
    writeln!(
        svg,
        r#"    <linearGradient id="{gradient_id}" x1="0" y1="0" x2="1" y2="0">"#
    )?;
    for i in 0..GRADIENT_STOPS {
        let t = i as f32 / (GRADIENT_STOPS - 1) as f32;
        writeln!(
            svg,
            r#"      <stop offset="{:.2}" stop-color="{}"/>"#,
            t,
            hex(palette.sample(t))
        )?;
    }
    writeln!(svg, "    </linearGradient>")?;
    writeln!(svg, "  </defs>")?;

    writeln!(
        svg,
        r#"  <text x="{}" y="22" font-size="15" font-weight="bold" text-anchor="middle">{}</text>"#,
        WIDTH / 2,
        escape(palette.title())
    )?;
    writeln!(
        svg,
        r#"  <rect x="{BAR_X}" y="{BAR_Y}" width="{BAR_W}" height="{BAR_H}" fill="url(#{gradient_id})" stroke="black" stroke-width="1"/>"#
    )?;

    let tick_top = BAR_Y + BAR_H;
    for pct in TICKS {
        let x = BAR_X + BAR_W * pct / 100;
        writeln!(
            svg,
            r#"  <line x1="{x}" y1="{tick_top}" x2="{x}" y2="{}" stroke="black" stroke-width="1"/>"#,
            tick_top + 5
        )?;
        writeln!(
            svg,
            r#"  <text x="{x}" y="{}" font-size="11" text-anchor="middle">{pct}%</text>"#,
            tick_top + 18
        )?;
    }

    let anchor_y = tick_top + 34;
    writeln!(
        svg,
        r#"  <text x="{BAR_X}" y="{anchor_y}" font-size="12" text-anchor="start">low activation</text>"#
    )?;
    writeln!(
        svg,
        r#"  <text x="{}" y="{anchor_y}" font-size="12" text-anchor="end">high activation</text>"#,
        BAR_X + BAR_W
    )?;

    for (i, band) in bands.iter().enumerate() {
        let y = anchor_y + 16 * (i as u32 + 1);
        let swatch = hex(palette.sample((band.from + band.to) / 2.0));
        writeln!(
            svg,
            r#"  <rect x="{BAR_X}" y="{}" width="10" height="10" fill="{swatch}"/>"#,
            y - 9
        )?;
        writeln!(
            svg,
            r#"  <text x="{}" y="{y}" font-size="11">{:.0}-{:.0}%: {}</text>"#,
            BAR_X + 16,
            band.from * 100.0,
            band.to * 100.0,
            escape(band.label)
        )?;
    }

    svg.push_str("</svg>\n");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legend_contents() {
        let svg = render_legend_svg(Palette::Inferno);
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        for tick in ["0%", "25%", "50%", "75%", "100%"] {
            assert!(svg.contains(&format!(">{tick}</text>")), "missing tick {tick}");
        }
        assert!(svg.contains("low activation"));
        assert!(svg.contains("high activation"));
        assert!(svg.contains("Inferno"));
        assert!(svg.contains("#000004"));
        assert!(svg.contains("#fcffa4"));
    }

    #[test]
    fn test_jet_medical_legend_lists_bands() {
        let svg = render_legend_svg(Palette::JetMedical);
        assert!(svg.contains("normal (blue/cyan)"));
        assert!(svg.contains("critical (red)"));
    }

    #[test]
    fn test_legend_is_deterministic() {
        assert_eq!(
            render_legend_svg(Palette::Viridis),
            render_legend_svg(Palette::Viridis)
        );
    }
}
