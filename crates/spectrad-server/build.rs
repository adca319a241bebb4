use std::process::Command;

fn main() {
    if let Ok(profile) = std::env::var("PROFILE") {
        println!("cargo:rustc-env=SPECTRAD_PROFILE={profile}");
    }
    if let Ok(target) = std::env::var("TARGET") {
        println!("cargo:rustc-env=SPECTRAD_TARGET={target}");
    }

    let mut enabled_features = Vec::new();
    for (feature_env, feature_name) in [
        ("CARGO_FEATURE_AM_PLL", "am-pll"),
        ("CARGO_FEATURE_AV1", "av1"),
        ("CARGO_FEATURE_OPUS", "opus"),
    ] {
        if std::env::var_os(feature_env).is_some() {
            enabled_features.push(feature_name);
        }
    }
    println!(
        "cargo:rustc-env=SPECTRAD_FEATURES={}",
        enabled_features.join(",")
    );

    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    if let Some(commit) = run_git(["rev-parse", "--short=12", "HEAD"]) {
        println!("cargo:rustc-env=SPECTRAD_GIT_COMMIT={commit}");
    }
    let git_dirty = run_git(["status", "--porcelain"]).is_some_and(|s| !s.trim().is_empty());
    println!("cargo:rustc-env=SPECTRAD_GIT_DIRTY={git_dirty}");
}

fn run_git<const N: usize>(args: [&str; N]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8(out.stdout).ok()?;
    Some(s.trim().to_string())
}
