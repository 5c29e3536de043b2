use fundus_cam::{CamError, Interpolation, Palette, Smoothing, VisualizationConfig};

#[test]
fn test_partial_toml_fills_defaults() {
    let config: VisualizationConfig = toml::from_str(
        r#"
palette = "jet_medical"
percentile_range = [1.0, 99.0]

[smoothing]
method = "gaussian"
kernel = 9
"#,
    )
    .unwrap();
    assert_eq!(config.palette, Palette::JetMedical);
    assert_eq!(config.percentile_range, (1.0, 99.0));
    assert_eq!(config.smoothing, Smoothing::Gaussian { kernel: 9 });
    assert_eq!(config.target_size, 512);
    assert_eq!(config.interpolation, Interpolation::Lanczos);
    assert!(config.validate().is_ok());
}

#[test]
fn test_unknown_palette_in_toml_is_rejected() {
    let parsed: Result<VisualizationConfig, _> = toml::from_str(r#"palette = "sepia""#);
    assert!(parsed.is_err());
}

#[test]
fn test_validate_rejects_inverted_percentiles() {
    let config = VisualizationConfig {
        percentile_range: (99.0, 1.0),
        ..VisualizationConfig::default()
    };
    assert!(matches!(config.validate(), Err(CamError::InvalidConfig(_))));
}
