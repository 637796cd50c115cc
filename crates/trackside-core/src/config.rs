/// Configuration for the Trackside renderer.
#[derive(Debug, Clone)]
pub struct Config {
    /// Width of every atlas layer, in pixels.
    pub atlas_width: u32,
    /// Height of every atlas layer, in pixels.
    pub atlas_height: u32,
    /// Smallest slot class. Sprites smaller than this share its class.
    pub min_slot_size: u32,
    /// Caps the atlas array below the device's layer limit when set.
    pub max_atlas_layers: Option<u32>,
    /// Instance capacity reserved up front by every command batch.
    pub initial_batch_capacity: usize,
    pub profiling: ProfilingMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            atlas_width: 1024,
            atlas_height: 512,
            min_slot_size: 4,
            max_atlas_layers: None,
            initial_batch_capacity: 0,
            profiling: ProfilingMode::Off,
        }
    }
}

impl Config {
    pub fn with_atlas_size(mut self, width: u32, height: u32) -> Self {
        self.atlas_width = width;
        self.atlas_height = height;
        self
    }

    pub fn with_min_slot_size(mut self, size: u32) -> Self {
        self.min_slot_size = size;
        self
    }

    pub fn with_max_atlas_layers(mut self, layers: u32) -> Self {
        self.max_atlas_layers = Some(layers);
        self
    }

    pub fn with_initial_batch_capacity(mut self, capacity: usize) -> Self {
        self.initial_batch_capacity = capacity;
        self
    }

    pub fn with_profiling(mut self, mode: ProfilingMode) -> Self {
        self.profiling = mode;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilingMode {
    /// Profiling is disabled
    Off,
    /// Scopes are recorded in-process
    On,
    /// Scopes are recorded and served to external tools such as 'puffin_viewer'
    WithServer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_atlas_dimensions() {
        let config = Config::default();
        assert_eq!((config.atlas_width, config.atlas_height), (1024, 512));
        assert_eq!(config.min_slot_size, 4);
        assert!(config.max_atlas_layers.is_none());
    }

    #[test]
    fn test_builder_setters() {
        let config = Config::default()
            .with_atlas_size(64, 64)
            .with_max_atlas_layers(2)
            .with_initial_batch_capacity(8);
        assert_eq!(config.atlas_width, 64);
        assert_eq!(config.max_atlas_layers, Some(2));
        assert_eq!(config.initial_batch_capacity, 8);
    }
}
