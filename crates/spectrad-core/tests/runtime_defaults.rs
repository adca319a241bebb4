use spectrad_core::config::{Config, SignalType};

fn parse(toml_src: &str) -> Config {
    toml::from_str(toml_src).unwrap()
}

#[test]
fn runtime_derives_iq_geometry() {
    let cfg = parse(
        r#"
        [input]
        sps = 2_000_000
        frequency = 14_000_000
        signal = "iq"
        fft_size = 131072
        audio_sps = 12000
        waterfall_size = 1024

        [input.driver]
        name = "stdin"
        format = "f32"
        "#,
    );
    let rt = cfg.runtime().unwrap();

    assert_eq!(rt.fft_result_size, 131_072);
    assert_eq!(rt.basefreq, 14_000_000 - 1_000_000);
    assert_eq!(rt.total_bandwidth, 2_000_000);
    // 131072 / 2^(k-1) >= 1024 holds for k = 1..=8.
    assert_eq!(rt.downsample_levels, 8);
    // ceil(12000 * 131072 / 2e6 / 4) * 4
    assert_eq!(rt.audio_max_fft_size, 788);
}

#[test]
fn runtime_derives_real_geometry_and_defaults() {
    let cfg = parse(
        r#"
        [input]
        sps = 12_000_000
        frequency = 0
        signal = "real"
        fft_size = 262144
        audio_sps = 12000
        waterfall_size = 1024

        [input.defaults]
        modulation = "LSB"

        [input.driver]
        name = "stdin"
        format = "s16"
        "#,
    );
    assert_eq!(cfg.input.signal, SignalType::Real);
    let rt = cfg.runtime().unwrap();

    assert_eq!(rt.fft_result_size, 131_072);
    assert_eq!(rt.total_bandwidth, 6_000_000);
    assert_eq!(rt.default_mode_str, "LSB");
    assert!(rt.default_l >= 0);
    assert!(rt.default_r >= rt.default_l);
    assert!(
        (rt.default_r - rt.default_l) as usize <= rt.audio_max_fft_size.min(rt.fft_result_size)
    );
    assert!(rt.default_m >= rt.default_l as f64 && rt.default_m <= rt.default_r as f64);
}

#[test]
fn missing_sps_is_a_config_error() {
    let res: Result<Config, _> = toml::from_str(
        r#"
        [input]
        frequency = 1000000
        signal = "iq"

        [input.driver]
        name = "stdin"
        "#,
    );
    assert!(res.is_err());
}

#[test]
fn unknown_signal_type_is_rejected() {
    let res: Result<Config, _> = toml::from_str(
        r#"
        [input]
        sps = 1000000
        frequency = 1000000
        signal = "complex"

        [input.driver]
        name = "stdin"
        "#,
    );
    assert!(res.is_err());
}

#[test]
fn audio_sps_above_bandwidth_is_rejected() {
    let cfg = parse(
        r#"
        [input]
        sps = 16000
        frequency = 0
        signal = "real"
        fft_size = 8192
        audio_sps = 12000
        waterfall_size = 512

        [input.driver]
        name = "stdin"
        "#,
    );
    // Real input bandwidth is sps/2 = 8 kHz, below the requested 12 kHz.
    assert!(cfg.runtime().is_err());
}

#[test]
fn wbfm_default_widens_the_window() {
    let cfg = parse(
        r#"
        [input]
        sps = 2_000_000
        frequency = 100_000_000
        signal = "iq"
        fft_size = 65536
        audio_sps = 48000
        waterfall_size = 1024

        [input.defaults]
        modulation = "WBFM"

        [input.driver]
        name = "stdin"
        "#,
    );
    let rt = cfg.runtime().unwrap();
    assert_eq!(rt.default_mode_str, "WBFM");
    // +-96 kHz clamps to the audio IFFT width.
    assert_eq!(
        (rt.default_r - rt.default_l) as usize,
        rt.audio_max_fft_size.min(rt.fft_result_size)
    );
}
