use anyhow::{anyhow, bail, Context, Result};
use log::*;
use serde::Serialize;

pub mod fetch;

pub const DEFAULT_APPCAST_URL: &str =
    "https://persistent.oaistatic.com/codex-app-prod/appcast.xml";

/// Sparkle keeps its version metadata in this namespace, either as child
/// elements of `<item>` or as attributes on `<enclosure>`.
pub const SPARKLE_NS: &str = "http://www.andymatuschak.org/xml-namespaces/sparkle";

const SNIPPET_LIMIT: usize = 400;

/// The latest release extracted from the appcast. This is what gets
/// serialized to stdout, with the fields in this exact order.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ReleaseRecord {
    pub appcast_url: String,
    pub dmg_url: String,
    pub short_version: String,
    pub build_version: String,
    pub pub_date: String,
    pub tag_name: String,
}

impl ReleaseRecord {
    /// The download url and both version identifiers are required;
    /// `pub_date` may be empty.
    pub fn new(
        appcast_url: &str,
        dmg_url: Option<&str>,
        short_version: Option<&str>,
        build_version: Option<&str>,
        pub_date: &str,
    ) -> Result<ReleaseRecord> {
        let (dmg_url, short_version, build_version) =
            match (dmg_url, short_version, build_version) {
                (Some(u), Some(s), Some(b))
                    if !u.is_empty() && !s.is_empty() && !b.is_empty() =>
                {
                    (u, s, b)
                }
                _ => bail!("Invalid appcast: missing required version attributes"),
            };
        Ok(ReleaseRecord {
            appcast_url: appcast_url.to_string(),
            dmg_url: dmg_url.to_string(),
            short_version: short_version.to_string(),
            build_version: build_version.to_string(),
            pub_date: pub_date.to_string(),
            tag_name: format!("codex-intel-v{}-{}", short_version, build_version),
        })
    }
}

/// Use the command line argument when one was given and is non-blank,
/// otherwise the production appcast.
pub fn resolve_url(arg: Option<&str>) -> String {
    match arg.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => trimmed.to_string(),
        _ => DEFAULT_APPCAST_URL.to_string(),
    }
}

/// Fetch the feed and extract the latest release.
pub fn run(url_arg: Option<&str>) -> Result<ReleaseRecord> {
    let url = resolve_url(url_arg);
    let bytes = fetch::fetch_bytes(&url)?;
    parse_appcast(&url, &bytes)
}

/// This function walks the appcast looking for the first release item
/// and pulls out three things:
/// 1. The download link, from the `url` attribute of `<enclosure>`
/// 2. The marketing version (`shortVersionString`)
/// 3. The build version (`version`)
///
/// The two version values live in the sparkle namespace. Newer appcasts
/// carry them as child elements of `<item>`; older ones put them on
/// `<enclosure>` as attributes. A non-empty element always wins over
/// the attribute.
pub fn parse_appcast(appcast_url: &str, bytes: &[u8]) -> Result<ReleaseRecord> {
    debug!("Received XML payload: bytes={}", bytes.len());
    let text = std::str::from_utf8(bytes).context("Appcast is not valid UTF-8")?;
    if log_enabled!(Level::Debug) {
        debug!("XML snippet: {}", sanitize_snippet(text));
    }

    let doc = roxmltree::Document::parse(text).context("Appcast is not well-formed XML")?;
    let root = doc.root_element();
    debug!("Root tag: {}", root.tag_name().name());

    let channel = child_element(root, "channel")
        .ok_or_else(|| anyhow!("Invalid appcast: missing channel"))?;
    debug!("Found channel element");

    let item = child_element(channel, "item")
        .ok_or_else(|| anyhow!("Invalid appcast: missing item"))?;
    debug!("Found first item element");

    let enclosure = child_element(item, "enclosure")
        .ok_or_else(|| anyhow!("Invalid appcast: missing enclosure"))?;
    debug!("Found enclosure element");

    let dmg_url = enclosure.attribute("url");
    let short_version = sparkle_field(item, enclosure, "shortVersionString");
    let build_version = sparkle_field(item, enclosure, "version");
    let pub_date = child_element(item, "pubDate")
        .and_then(|el| el.text())
        .map(str::trim)
        .unwrap_or("");

    let missing = |field: Option<&str>| field.map_or(true, str::is_empty);
    if missing(dmg_url) || missing(short_version) || missing(build_version) {
        debug!("Resolved dmg_url={:?}", dmg_url);
        debug!("Resolved short_version={:?}", short_version);
        debug!("Resolved build_version={:?}", build_version);
        if log_enabled!(Level::Debug) {
            let tags: Vec<&str> = item
                .children()
                .filter(|n| n.is_element())
                .map(|n| n.tag_name().name())
                .collect();
            debug!("Item children tags: {:?}", tags);
            for attr in enclosure.attributes() {
                debug!("Enclosure attr: {}={:?}", attr.name(), attr.value());
            }
        }
    }

    ReleaseRecord::new(appcast_url, dmg_url, short_version, build_version, pub_date)
}

fn child_element<'a, 'input>(
    parent: roxmltree::Node<'a, 'input>,
    name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    parent
        .children()
        .find(|n| n.is_element() && n.has_tag_name(name))
}

fn sparkle_field<'a>(
    item: roxmltree::Node<'a, '_>,
    enclosure: roxmltree::Node<'a, '_>,
    name: &str,
) -> Option<&'a str> {
    item.children()
        .find(|n| n.has_tag_name((SPARKLE_NS, name)))
        .and_then(|el| el.text())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| enclosure.attribute((SPARKLE_NS, name)))
}

/// Compact whitespace and cap the length so a feed dump doesn't flood
/// the log.
fn sanitize_snippet(text: &str) -> String {
    let compact = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if compact.len() <= SNIPPET_LIMIT {
        return compact;
    }
    // Back up to a char boundary; slicing mid-codepoint panics.
    let mut cut = SNIPPET_LIMIT - 3;
    while !compact.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &compact[..cut])
}
