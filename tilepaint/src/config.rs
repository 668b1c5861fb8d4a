use tilepaint_core::settings::EngineSettings;

const DOCUMENTATION: &str = r#"# Tilepaint engine settings. You may edit this file, but be aware that formatting and comments will
# not be preserved. Missing keys take their default value.

# tile_size: side of a tile in pixels, a power of two from 16 to 512.
# max_undo_steps: undo steps kept before the oldest become permanent.
# active_resolutions: resolutions re-rendered after every batch, any of "full", "half", "quarter", "eighth".
# color_space: "srgb" or "linear_srgb", the space colors are blended in.
# render_threads: tile render workers, 0 to let the system decide.

"#;

#[must_use]
pub fn preferences_dir() -> Option<std::path::PathBuf> {
    let mut base_dir = dirs::preference_dir()?;
    base_dir.push(env!("CARGO_PKG_NAME"));
    Some(base_dir)
}

pub struct Settings {
    failed_to_load: bool,
    pub engine: EngineSettings,
}
impl Settings {
    const FILENAME: &'static str = "settings.toml";
    /// Load from `path`, or from the user preferences if `None`.
    /// Defaults are used, with a warning, if that fails for any reason.
    #[must_use]
    pub fn load(path: Option<&std::path::Path>) -> Self {
        match path {
            Some(path) => Self::load_or_default(path),
            None => match preferences_dir() {
                None => Self::no_path(),
                Some(mut dir) => {
                    dir.push(Self::FILENAME);
                    Self::load_or_default(&dir)
                }
            },
        }
    }
    #[must_use]
    pub fn no_path() -> Self {
        log::warn!("Settings weren't available, defaulting.");
        Self {
            failed_to_load: true,
            engine: EngineSettings::default(),
        }
    }
    #[must_use]
    fn load_or_default(path: &std::path::Path) -> Self {
        let engine: anyhow::Result<EngineSettings> = try_block::try_block! {
            let string = std::fs::read_to_string(path)?;
            let engine : EngineSettings = toml::from_str(&string)?;

            Ok(engine)
        };

        match engine {
            Ok(engine) => Self {
                failed_to_load: false,
                engine: engine.validated(),
            },
            Err(e) => {
                log::warn!("failed to load settings from {path:?}: {e:#}");
                Self::no_path()
            }
        }
    }
    /// Return true if loading the user's settings failed.
    #[must_use]
    pub fn did_fail_to_load(&self) -> bool {
        self.failed_to_load
    }
    /// Write the settings to the user preferences, unless a file is already there.
    pub fn save_if_missing(&self) -> anyhow::Result<()> {
        let mut preferences =
            preferences_dir().ok_or_else(|| anyhow::anyhow!("No preferences dir found"))?;
        // Not recursive. If the parent is missing, the user probably has a good reason.
        let _ = std::fs::DirBuilder::new().create(&preferences);

        preferences.push(Self::FILENAME);
        if preferences.exists() {
            return Ok(());
        }
        std::fs::write(&preferences, Self::to_documented_string(&self.engine)?)?;
        log::info!("wrote default settings to {preferences:?}");
        Ok(())
    }
    fn to_documented_string(engine: &EngineSettings) -> anyhow::Result<String> {
        let string = toml::ser::to_string_pretty(engine)?;
        Ok(DOCUMENTATION.to_owned() + &string)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tilepaint_core::tile::Resolution;

    #[test]
    fn documented_defaults_read_back() {
        let string = Settings::to_documented_string(&EngineSettings::default()).unwrap();
        let read: EngineSettings = toml::from_str(&string).unwrap();
        assert_eq!(read, EngineSettings::default());
    }
    #[test]
    fn partial_file_fills_defaults() {
        let read: EngineSettings =
            toml::from_str("tile_size = 32\nactive_resolutions = [\"half\"]").unwrap();
        assert_eq!(read.tile_size, 32);
        assert_eq!(read.active_resolutions, vec![Resolution::Half]);
        assert_eq!(read.max_undo_steps, EngineSettings::default().max_undo_steps);
    }
    #[test]
    fn unreadable_file_defaults() {
        let settings = Settings::load(Some(std::path::Path::new(
            "/this/path/does/not/exist/settings.toml",
        )));
        assert!(settings.did_fail_to_load());
        assert_eq!(settings.engine, EngineSettings::default());
    }
}
