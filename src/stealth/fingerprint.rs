use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StealthSettings;
use crate::error::ProfileError;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1366, 768),
    (1440, 900),
    (1536, 864),
    (1280, 720),
];

const WEBGL_VENDORS: &[&str] = &["Google Inc.", "Mozilla", "Apple Inc."];

const WEBGL_RENDERERS: &[&str] = &[
    "ANGLE (Intel(R) HD Graphics 620 Direct3D11 vs_5_0 ps_5_0)",
    "WebKit WebGL",
    "Mozilla -- GPU",
];

const TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Los_Angeles",
    "Europe/London",
    "Europe/Paris",
    "Asia/Tokyo",
    "Asia/Shanghai",
];

const PLATFORMS: &[&str] = &["Win32", "MacIntel", "Linux x86_64"];

const FONTS: &[&str] = &[
    "Arial", "Helvetica", "Times New Roman", "Courier New",
    "Verdana", "Georgia", "Palatino", "Garamond",
];

const LANGUAGE: &str = "en-US,en;q=0.9";

/// Ephemeral per-request client fingerprint. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_agent: String,
    pub viewport: Viewport,
    pub canvas: CanvasFingerprint,
    pub webgl: WebGlFingerprint,
    pub fonts: Vec<String>,
    pub timezone: String,
    pub language: String,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasFingerprint {
    pub noise: f64,
    pub text_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebGlFingerprint {
    pub vendor: String,
    pub renderer: String,
}

impl Profile {
    /// Bare profile used when fingerprinting is disabled.
    fn minimal(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            viewport: Viewport { width: 1920, height: 1080 },
            canvas: CanvasFingerprint { noise: 0.0, text_value: String::new() },
            webgl: WebGlFingerprint {
                vendor: WEBGL_VENDORS[0].to_string(),
                renderer: WEBGL_RENDERERS[0].to_string(),
            },
            fonts: vec![],
            timezone: TIMEZONES[0].to_string(),
            language: LANGUAGE.to_string(),
            platform: PLATFORMS[0].to_string(),
        }
    }
}

/// Produces a fresh fingerprint per request from curated attribute lists.
/// Pure apart from its PRNG, which can be seeded for reproducible runs.
pub struct StealthEngine {
    config: StealthSettings,
    default_user_agent: String,
    rng: Mutex<StdRng>,
}

impl StealthEngine {
    pub fn new(config: StealthSettings, default_user_agent: String) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            default_user_agent,
            rng: Mutex::new(rng),
        }
    }

    /// Generate the fingerprint for one outbound request.
    pub fn generate_profile(&self, target_url: &str) -> Result<Profile, ProfileError> {
        if !self.config.enabled {
            return Ok(Profile::minimal(&self.default_user_agent));
        }

        let mut rng = self.rng.lock().unwrap();

        let user_agent = if self.config.user_agent_rotation {
            if USER_AGENTS.is_empty() {
                return Err(ProfileError::NoUserAgents);
            }
            USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())].to_string()
        } else {
            self.default_user_agent.clone()
        };

        let (width, height) = VIEWPORTS[rng.gen_range(0..VIEWPORTS.len())];

        let canvas = if self.config.canvas_noise {
            CanvasFingerprint {
                noise: rng.gen::<f64>() * 0.1,
                text_value: format!("crawl{}", rng.gen_range(0..1000)),
            }
        } else {
            CanvasFingerprint { noise: 0.0, text_value: String::new() }
        };

        let webgl = if self.config.webgl_spoofing {
            WebGlFingerprint {
                vendor: WEBGL_VENDORS[rng.gen_range(0..WEBGL_VENDORS.len())].to_string(),
                renderer: WEBGL_RENDERERS[rng.gen_range(0..WEBGL_RENDERERS.len())].to_string(),
            }
        } else {
            WebGlFingerprint {
                vendor: WEBGL_VENDORS[0].to_string(),
                renderer: WEBGL_RENDERERS[0].to_string(),
            }
        };

        let profile = Profile {
            user_agent,
            viewport: Viewport { width, height },
            canvas,
            webgl,
            fonts: FONTS.iter().map(|f| f.to_string()).collect(),
            timezone: TIMEZONES[rng.gen_range(0..TIMEZONES.len())].to_string(),
            language: LANGUAGE.to_string(),
            platform: PLATFORMS[rng.gen_range(0..PLATFORMS.len())].to_string(),
        };

        debug!("Generated profile for {}: {}", target_url, profile.user_agent);

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(seed: u64) -> StealthSettings {
        StealthSettings {
            enabled: true,
            fingerprint_rotation: true,
            canvas_noise: true,
            webgl_spoofing: true,
            user_agent_rotation: true,
            seed: Some(seed),
        }
    }

    #[test]
    fn disabled_engine_returns_default_user_agent() {
        let config = StealthSettings { enabled: false, ..settings(1) };
        let engine = StealthEngine::new(config, "crawlerd/1.0".to_string());

        let profile = engine.generate_profile("http://example.com/").unwrap();
        assert_eq!(profile.user_agent, "crawlerd/1.0");
        assert_eq!(profile.canvas.noise, 0.0);
        assert_eq!(profile.language, LANGUAGE);
    }

    #[test]
    fn attributes_come_from_curated_lists() {
        let engine = StealthEngine::new(settings(7), "crawlerd/1.0".to_string());

        for _ in 0..50 {
            let profile = engine.generate_profile("http://example.com/").unwrap();
            assert!(USER_AGENTS.contains(&profile.user_agent.as_str()));
            assert!(VIEWPORTS.contains(&(profile.viewport.width, profile.viewport.height)));
            assert!(WEBGL_VENDORS.contains(&profile.webgl.vendor.as_str()));
            assert!(WEBGL_RENDERERS.contains(&profile.webgl.renderer.as_str()));
            assert!(TIMEZONES.contains(&profile.timezone.as_str()));
            assert!(PLATFORMS.contains(&profile.platform.as_str()));
            assert!(profile.canvas.noise >= 0.0 && profile.canvas.noise < 0.1);
            assert!(profile.canvas.text_value.starts_with("crawl"));
        }
    }

    #[test]
    fn same_seed_generates_same_sequence() {
        let a = StealthEngine::new(settings(42), "crawlerd/1.0".to_string());
        let b = StealthEngine::new(settings(42), "crawlerd/1.0".to_string());

        for _ in 0..10 {
            let pa = a.generate_profile("http://example.com/").unwrap();
            let pb = b.generate_profile("http://example.com/").unwrap();
            assert_eq!(pa.user_agent, pb.user_agent);
            assert_eq!(pa.canvas.noise, pb.canvas.noise);
            assert_eq!(pa.timezone, pb.timezone);
            assert_eq!(pa.platform, pb.platform);
        }
    }

    #[test]
    fn rotation_disabled_pins_the_configured_user_agent() {
        let config = StealthSettings { user_agent_rotation: false, ..settings(3) };
        let engine = StealthEngine::new(config, "crawlerd/1.0".to_string());

        for _ in 0..5 {
            let profile = engine.generate_profile("http://example.com/").unwrap();
            assert_eq!(profile.user_agent, "crawlerd/1.0");
        }
    }
}
