// stealth.rs
use rand::seq::SliceRandom;
use serde::Serialize;

const CHROME_UAS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// Resource types dropped before they hit the network.
const BLOCKED_RESOURCE_TYPES: &[&str] = &["image", "font", "media"];

const BLOCKED_URL_MARKERS: &[&str] = &[
    "google-analytics",
    "googletagmanager",
    "facebook",
    "doubleclick",
    "googlesyndication",
    "analytics",
    "tracker",
    "advertisement",
    "/ads",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// How a browser page presents itself to the sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fingerprint {
    pub user_agent: String,
    pub accept_language: String,
    pub platform: String,
    pub languages: Vec<String>,
    pub viewport: Viewport,
    pub extra_headers: Vec<(String, String)>,
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::desktop_es_ar()
    }
}

impl Fingerprint {
    /// A Windows desktop Chrome with Argentine Spanish locale.
    pub fn desktop_es_ar() -> Self {
        Self::with_user_agent(CHROME_UAS[0])
    }

    /// Same locale, user agent drawn from the desktop Chrome list.
    pub fn random() -> Self {
        let ua = CHROME_UAS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(CHROME_UAS[0]);
        Self::with_user_agent(ua)
    }

    fn with_user_agent(ua: &str) -> Self {
        let platform = platform_for(ua);
        let accept_language = "es-AR,es;q=0.9,en;q=0.8".to_string();

        let extra_headers = vec![
            ("Accept-Language".to_string(), accept_language.clone()),
            (
                "Accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8"
                    .to_string(),
            ),
            ("Cache-Control".to_string(), "max-age=0".to_string()),
            ("Upgrade-Insecure-Requests".to_string(), "1".to_string()),
            ("sec-ch-ua-mobile".to_string(), "?0".to_string()),
            (
                "sec-ch-ua-platform".to_string(),
                format!("\"{}\"", ch_platform(platform)),
            ),
        ];

        Self {
            user_agent: ua.to_string(),
            accept_language,
            platform: platform.to_string(),
            languages: ["es-AR", "es", "en-US", "en"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            viewport: Viewport {
                width: 1920,
                height: 1080,
            },
            extra_headers,
        }
    }

    /// `--lang` value for the browser command line.
    pub fn lang_arg(&self) -> String {
        self.languages
            .iter()
            .take(2)
            .cloned()
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn headers_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .extra_headers
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        serde_json::Value::Object(map)
    }
}

fn platform_for(ua: &str) -> &'static str {
    if ua.contains("Macintosh") {
        "MacIntel"
    } else if ua.contains("Linux") {
        "Linux x86_64"
    } else {
        "Win32"
    }
}

fn ch_platform(platform: &str) -> &'static str {
    match platform {
        "MacIntel" => "macOS",
        "Linux x86_64" => "Linux",
        _ => "Windows",
    }
}

/// Init script evaluated before any page script runs.
pub fn stealth_script(fp: &Fingerprint) -> String {
    let languages = serde_json::to_string(&fp.languages).unwrap_or_else(|_| "[]".into());
    let platform = serde_json::to_string(&fp.platform).unwrap_or_else(|_| "\"Win32\"".into());

    format!(
        r#"(() => {{
  Object.defineProperty(navigator, 'webdriver', {{ get: () => false }});
  for (const key of Object.keys(window)) {{
    if (key.startsWith('cdc_')) {{ try {{ delete window[key]; }} catch (e) {{}} }}
  }}
  window.chrome = window.chrome || {{ runtime: {{}}, loadTimes: () => {{}}, csi: () => {{}}, app: {{}} }};
  Object.defineProperty(navigator, 'plugins', {{
    get: () => [{{
      0: {{ type: 'application/x-google-chrome-pdf', suffixes: 'pdf', description: 'Portable Document Format' }},
      description: 'Portable Document Format',
      filename: 'internal-pdf-viewer',
      length: 1,
      name: 'Chrome PDF Plugin'
    }}]
  }});
  Object.defineProperty(navigator, 'languages', {{ get: () => {languages} }});
  Object.defineProperty(navigator, 'platform', {{ get: () => {platform} }});
  if (navigator.permissions && navigator.permissions.query) {{
    const originalQuery = navigator.permissions.query.bind(navigator.permissions);
    navigator.permissions.query = (parameters) =>
      parameters && parameters.name === 'notifications'
        ? Promise.resolve({{ state: Notification.permission }})
        : originalQuery(parameters);
  }}
}})();"#
    )
}

/// Whether a sub-resource request should be failed instead of fetched.
/// `resource_type` is the CDP resource type in any case.
pub fn should_block(resource_type: &str, url: &str) -> bool {
    let resource_type = resource_type.to_ascii_lowercase();
    if BLOCKED_RESOURCE_TYPES.contains(&resource_type.as_str()) {
        return true;
    }
    // The document itself is never blocked, whatever its url says.
    if resource_type == "document" {
        return false;
    }
    let url = url.to_ascii_lowercase();
    BLOCKED_URL_MARKERS.iter().any(|m| url.contains(m))
}
