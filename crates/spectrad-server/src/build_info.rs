use std::borrow::Cow;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn features() -> Cow<'static, str> {
    Cow::Borrowed(option_env!("SPECTRAD_FEATURES").unwrap_or(""))
}

pub fn profile() -> &'static str {
    option_env!("SPECTRAD_PROFILE").unwrap_or("release")
}

pub fn target() -> &'static str {
    option_env!("SPECTRAD_TARGET").unwrap_or("")
}

pub fn git_commit() -> Option<&'static str> {
    option_env!("SPECTRAD_GIT_COMMIT")
}

pub fn git_dirty() -> Option<bool> {
    option_env!("SPECTRAD_GIT_DIRTY").and_then(|s| match s {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    })
}
