//! Helpers shared by tests that drive the shell targets in `test_targets/`.

use crate::driver::DriverOptions;
use crate::profile::{CustomProfile, EditorProfile};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn get_test_target_path(name: &str) -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir.join("../test_targets").join(name)
}

pub(crate) fn shell_target(script: &str) -> Arc<dyn EditorProfile> {
    let target_path = get_test_target_path(script);
    if !target_path.exists() {
        panic!("Test target missing: {target_path:?}");
    }
    Arc::new(CustomProfile::new(
        script,
        "/bin/sh",
        vec![target_path.to_string_lossy().into_owned()],
    ))
}

pub(crate) fn fast_options() -> DriverOptions {
    DriverOptions {
        ready_timeout: Duration::from_secs(5),
        quit_timeout: Duration::from_millis(500),
        term_grace: Duration::from_millis(200),
        ..DriverOptions::default()
    }
}
