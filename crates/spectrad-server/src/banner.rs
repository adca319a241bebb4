pub fn log_startup_banner() {
    let version = crate::build_info::version();
    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    let features = crate::build_info::features();
    let profile = crate::build_info::profile();
    let target = crate::build_info::target();
    let git_commit = crate::build_info::git_commit().unwrap_or("");
    let git_dirty = crate::build_info::git_dirty();

    tracing::info!(
        target: "spectrad_banner",
        version,
        os,
        arch,
        features = %features,
        profile,
        target,
        git_commit,
        git_dirty,
        "startup"
    );
}
