use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

const APP_NAME: &str = "chai-relay";

pub fn app_root() -> PathBuf {
    if let Some(project_dirs) = ProjectDirs::from("", "", APP_NAME) {
        return project_dirs.data_dir().to_path_buf();
    }

    if let Some(base_dirs) = BaseDirs::new() {
        return base_dirs.data_local_dir().join(APP_NAME);
    }

    std::env::temp_dir().join(APP_NAME)
}

pub fn default_db_path() -> String {
    app_root()
        .join("data")
        .join("chai-relay.db")
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_db_path_lives_under_app_root() {
        let path = default_db_path();
        assert!(path.ends_with("chai-relay.db"));
        assert!(path.starts_with(app_root().to_string_lossy().as_ref()));
    }
}
