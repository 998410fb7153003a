//! Map navigation targets for the venue.
//!
//! Mobile visitors get an app deep link plus a web URL to open if the app
//! does not take over within `fallback_after_ms`; desktop visitors get the
//! web URL only.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::{fmt, str::FromStr, sync::LazyLock};
use thiserror::Error;

pub const APP_FALLBACK_MS: u64 = 1500;
const APP_NAME: &str = "wedding-invitation";

static MOBILE_AGENTS: LazyLock<Regex> = LazyLock::new(|| {
    RegexBuilder::new("Android|webOS|iPhone|iPad|iPod|BlackBerry|IEMobile|Opera Mini")
        .case_insensitive(true)
        .build()
        .expect("mobile agent regex is valid")
});

/// Characters left unescaped by a URI component encoder.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub(crate) fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MapProvider {
    Naver,
    Kakao,
    Tmap,
}

#[derive(Debug, Error)]
#[error("unknown map provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for MapProvider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "naver" => Ok(Self::Naver),
            "kakao" => Ok(Self::Kakao),
            "tmap" => Ok(Self::Tmap),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

impl fmt::Display for MapProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Naver => "naver",
            Self::Kakao => "kakao",
            Self::Tmap => "tmap",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NavigationTarget {
    App {
        app_url: String,
        web_url: String,
        fallback_after_ms: u64,
    },
    Web {
        url: String,
    },
}

/// Decides whether a request comes from a device that can open map apps.
pub trait PlatformDetector: Send + Sync {
    fn is_mobile(&self, user_agent: &str) -> bool;
}

/// Matches the user agents of phones and tablets.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAgentDetector;

impl UserAgentDetector {
    pub fn new() -> Self {
        Self
    }
}

impl PlatformDetector for UserAgentDetector {
    fn is_mobile(&self, user_agent: &str) -> bool {
        MOBILE_AGENTS.is_match(user_agent)
    }
}

/// Venue name and address the deep links point at.
#[derive(Debug, Clone)]
pub struct Destination {
    pub venue: String,
    pub address: String,
}

pub fn web_url(provider: MapProvider, dest: &Destination) -> String {
    let address = encode_component(&dest.address);
    match provider {
        MapProvider::Naver => format!("https://map.naver.com/search/{}", address),
        MapProvider::Kakao => format!("https://map.kakao.com/search/{}", address),
        MapProvider::Tmap => format!(
            "https://www.tmap.co.kr/search/poi?searchKeyword={}",
            address
        ),
    }
}

pub fn app_url(provider: MapProvider, dest: &Destination) -> String {
    match provider {
        MapProvider::Naver => format!(
            "nmap://search?query={}&appname={}",
            encode_component(&dest.address),
            APP_NAME
        ),
        MapProvider::Kakao => format!(
            "kakaonavi://destination?name={}",
            encode_component(&dest.venue)
        ),
        MapProvider::Tmap => format!("tmap://search?name={}", encode_component(&dest.venue)),
    }
}

pub fn resolve_target(
    detector: &dyn PlatformDetector,
    user_agent: &str,
    provider: MapProvider,
    dest: &Destination,
) -> NavigationTarget {
    if detector.is_mobile(user_agent) {
        NavigationTarget::App {
            app_url: app_url(provider, dest),
            web_url: web_url(provider, dest),
            fallback_after_ms: APP_FALLBACK_MS,
        }
    } else {
        NavigationTarget::Web {
            url: web_url(provider, dest),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPHONE: &str =
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148";
    const DESKTOP: &str =
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 Chrome/120.0 Safari/537.36";

    fn venue() -> Destination {
        Destination {
            venue: "Grand Hall".into(),
            address: "200 Dongchon-ro".into(),
        }
    }

    #[test]
    fn detects_mobile_agents_case_insensitively() {
        let detector = UserAgentDetector::new();
        assert!(detector.is_mobile(IPHONE));
        assert!(detector.is_mobile("some ANDROID browser"));
        assert!(!detector.is_mobile(DESKTOP));
        assert!(!detector.is_mobile(""));
    }

    #[test]
    fn mobile_gets_app_link_with_web_fallback() {
        let target = resolve_target(&UserAgentDetector::new(), IPHONE, MapProvider::Naver, &venue());
        assert_eq!(
            target,
            NavigationTarget::App {
                app_url: "nmap://search?query=200%20Dongchon-ro&appname=wedding-invitation".into(),
                web_url: "https://map.naver.com/search/200%20Dongchon-ro".into(),
                fallback_after_ms: 1500,
            }
        );
    }

    #[test]
    fn desktop_gets_web_only() {
        let target = resolve_target(&UserAgentDetector::new(), DESKTOP, MapProvider::Tmap, &venue());
        assert_eq!(
            target,
            NavigationTarget::Web {
                url: "https://www.tmap.co.kr/search/poi?searchKeyword=200%20Dongchon-ro".into()
            }
        );
    }

    #[test]
    fn kakao_and_tmap_apps_search_by_venue() {
        assert_eq!(
            app_url(MapProvider::Kakao, &venue()),
            "kakaonavi://destination?name=Grand%20Hall"
        );
        assert_eq!(app_url(MapProvider::Tmap, &venue()), "tmap://search?name=Grand%20Hall");
    }

    #[test]
    fn injected_detector_overrides_user_agent() {
        struct AlwaysMobile;
        impl PlatformDetector for AlwaysMobile {
            fn is_mobile(&self, _: &str) -> bool {
                true
            }
        }
        let target = resolve_target(&AlwaysMobile, DESKTOP, MapProvider::Kakao, &venue());
        assert!(matches!(target, NavigationTarget::App { .. }));
    }

    #[test]
    fn provider_names_parse() {
        assert_eq!("Kakao".parse::<MapProvider>().unwrap(), MapProvider::Kakao);
        assert!("google".parse::<MapProvider>().is_err());
        assert_eq!(encode_component("a b&c"), "a%20b%26c");
    }
}
