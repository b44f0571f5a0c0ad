use std::path::PathBuf;

use rand::{seq::IndexedRandom, Rng};
use serde::Serialize;

/// Text styling for one rendered sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CssParams {
    pub font_size: u32,
    pub font_path: Option<PathBuf>,
    pub vertical: bool,
    pub line_height: f32,
    pub background_color: String,
    pub text_color: String,
    pub text_orientation: Option<String>,
    pub stroke_size: u32,
    pub stroke_color: String,
    pub shadow_size: u32,
    pub shadow_color: String,
    pub letter_spacing: Option<f32>,
}

impl Default for CssParams {
    fn default() -> Self {
        Self {
            font_size: 48,
            font_path: None,
            vertical: true,
            line_height: 0.5,
            background_color: "transparent".into(),
            text_color: "black".into(),
            text_orientation: None,
            stroke_size: 0,
            stroke_color: "black".into(),
            shadow_size: 0,
            shadow_color: "black".into(),
            letter_spacing: None,
        }
    }
}

impl CssParams {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut params = Self {
            vertical: rng.random::<f32>() < 0.7,
            ..Default::default()
        };

        if rng.random::<f32>() < 0.7 {
            params.text_orientation = Some("upright".into());
        }

        let variant: f32 = rng.random();
        if variant < 0.8 {
            params.stroke_size = *[1, 2, 3, 4, 8].choose(rng).unwrap_or(&1);
            params.stroke_color = "white".into();
        } else if variant < 0.95 {
            params.shadow_size = *[2, 5, 10].choose(rng).unwrap_or(&2);
            params.shadow_color = if rng.random::<f32>() < 0.8 {
                "white".into()
            } else {
                "black".into()
            };
        }

        params
    }
}

/// Values that replace the randomly drawn ones.
#[derive(Debug, Clone, Default)]
pub struct CssOverrides {
    pub font_path: Option<PathBuf>,
    pub font_size: Option<u32>,
    pub vertical: Option<bool>,
    pub line_height: Option<f32>,
    pub text_orientation: Option<String>,
    pub text_color: Option<String>,
    pub background_color: Option<String>,
    pub letter_spacing: Option<f32>,
}

impl CssOverrides {
    pub fn apply(&self, params: &mut CssParams) {
        if let Some(font_path) = &self.font_path {
            params.font_path = Some(font_path.clone());
        }
        if let Some(font_size) = self.font_size {
            params.font_size = font_size;
        }
        if let Some(vertical) = self.vertical {
            params.vertical = vertical;
        }
        if let Some(line_height) = self.line_height {
            params.line_height = line_height;
        }
        if let Some(orientation) = &self.text_orientation {
            params.text_orientation = Some(orientation.clone());
        }
        if let Some(color) = &self.text_color {
            params.text_color = color.clone();
        }
        if let Some(color) = &self.background_color {
            params.background_color = color.clone();
        }
        if let Some(spacing) = self.letter_spacing {
            params.letter_spacing = Some(spacing);
        }
    }
}

/// Stylesheet with a `custom` font face and the body style.
pub fn get_css(params: &CssParams) -> String {
    let mut styles = vec![
        format!("background-color: {};", params.background_color),
        format!("font-size: {}px;", params.font_size),
        format!("color: {};", params.text_color),
        "font-family: custom;".to_string(),
        format!("line-height: {};", params.line_height),
        "margin: 20px;".to_string(),
    ];

    if let Some(orientation) = &params.text_orientation {
        styles.push(format!("text-orientation: {};", orientation));
    }

    if params.vertical {
        styles.push("writing-mode: vertical-rl;".to_string());
    }

    if params.shadow_size > 0 {
        styles.push(format!(
            "text-shadow: 0 0 {}px {};",
            params.shadow_size, params.shadow_color
        ));
    }

    if params.stroke_size > 0 {
        // stroke is many stacked shadows
        let shadow = format!("0 0 {}px {}", params.stroke_size, params.stroke_color);
        let shadows = vec![shadow; 10 * params.stroke_size as usize].join(",");
        styles.push(format!("text-shadow: {};", shadows));
        styles.push("-webkit-font-smoothing: antialiased;".to_string());
    }

    if let Some(spacing) = params.letter_spacing {
        styles.push(format!("letter-spacing: {}em;", spacing));
    }

    let font_path = params
        .font_path
        .as_ref()
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();

    format!(
        "\n@font-face {{\nfont-family: custom;\nsrc: url(\"{}\");\n}}\nbody {{\n{}\n}}",
        font_path,
        styles.join("\n")
    )
}

pub fn lines_to_html(lines: &[String]) -> String {
    let body = lines
        .iter()
        .map(|line| format!("<p>{}</p>", line))
        .collect::<Vec<_>>()
        .join("\n");
    format!("<html><body>\n{}\n</body></html>", body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_get_css_stroke() {
        let params = CssParams {
            font_path: Some(PathBuf::from("fonts\\a.ttf")),
            stroke_size: 2,
            stroke_color: "white".into(),
            ..Default::default()
        };
        let css = get_css(&params);
        assert!(css.starts_with("\n@font-face {\nfont-family: custom;\nsrc: url(\"fonts/a.ttf\");\n}\nbody {\n"));
        assert!(css.contains("writing-mode: vertical-rl;"));
        assert_eq!(css.matches("0 0 2px white").count(), 20);
        assert!(css.ends_with("-webkit-font-smoothing: antialiased;\n}"));
    }

    #[test]
    fn test_get_css_horizontal_shadow() {
        let params = CssParams {
            vertical: false,
            shadow_size: 5,
            text_orientation: Some("upright".into()),
            letter_spacing: Some(0.1),
            ..Default::default()
        };
        let css = get_css(&params);
        assert!(!css.contains("writing-mode"));
        assert!(css.contains("text-shadow: 0 0 5px black;"));
        assert!(css.contains("text-orientation: upright;"));
        assert!(css.contains("letter-spacing: 0.1em;"));
    }

    #[test]
    fn test_random_params_are_consistent() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut vertical = 0;
        for _ in 0..500 {
            let params = CssParams::random(&mut rng);
            assert_eq!(params.font_size, 48);
            assert!(params.stroke_size == 0 || params.shadow_size == 0);
            if params.stroke_size > 0 {
                assert!([1, 2, 3, 4, 8].contains(&params.stroke_size));
            }
            vertical += params.vertical as usize;
        }
        assert!((250..450).contains(&vertical));
    }

    #[test]
    fn test_overrides() {
        let mut params = CssParams::default();
        CssOverrides {
            vertical: Some(false),
            font_path: Some(PathBuf::from("x.otf")),
            ..Default::default()
        }
        .apply(&mut params);
        assert!(!params.vertical);
        assert_eq!(params.font_path, Some(PathBuf::from("x.otf")));
        assert_eq!(params.font_size, 48);
    }

    #[test]
    fn test_lines_to_html() {
        let html = lines_to_html(&["あ".to_string(), "<ruby>漢<rt>かん</rt></ruby>".to_string()]);
        assert_eq!(
            html,
            "<html><body>\n<p>あ</p>\n<p><ruby>漢<rt>かん</rt></ruby></p>\n</body></html>"
        );
    }
}
