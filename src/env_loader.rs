use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(harvest_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(base) = harvest_home {
        return Some(base.join(".env"));
    }
    Some(home_dir?.join("lc_harvest/.env"))
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("HARVEST_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::fallback_dotenv_path;
    use std::path::PathBuf;

    #[test]
    fn fallback_prefers_harvest_home_root() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/srv/harvest")),
            Some(PathBuf::from("/home/cataloger")),
        );

        let want = Some(PathBuf::from("/srv/harvest/.env"));
        assert_eq!(got, want);
    }

    #[test]
    fn fallback_uses_home_subdir_when_harvest_home_unset() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/cataloger")));
        let want = Some(PathBuf::from("/home/cataloger/lc_harvest/.env"));
        assert_eq!(got, want);
    }

    #[test]
    fn fallback_is_none_without_any_base() {
        assert_eq!(fallback_dotenv_path(None, None), None);
    }
}
