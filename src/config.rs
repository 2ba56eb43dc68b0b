//! INI-style configuration for hub downloads.
//!
//! A config file has a `[DEFAULT]` section plus one section per data product:
//!
//! ```ini
//! [DEFAULT]
//! hub = https://s5phub.copernicus.eu/dhus/
//! username = s5pguest
//! password = s5pguest
//!
//! [NO2]
//! product = L2__NO2___
//! ```
//!
//! Lookups fall back from the chosen section to `DEFAULT` and then to the
//! built-in default listed in [`CONFIG_KEYS`]. Values may reference other keys
//! of the same section (or `DEFAULT`) with `%(key)s`.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};

use crate::download::{
    BadChecksumPolicy, ChecksumAlgorithm, Credentials, DEFAULT_NUM_TRIES, RetryPolicy,
};

/// Name of the fallback section.
pub const DEFAULT_SECTION: &str = "DEFAULT";

/// Sample file written by `make-cfg`.
pub const SAMPLE_CONFIG: &str = "\
[DEFAULT]
hub = https://s5phub.copernicus.eu/dhus/
num_tries = 5
on_bad_checksum = record
record_file = failed_downloads.txt
username =
password =

[NO2]
product = L2__NO2___
";

/// Nested `%(key)s` references deeper than this are treated as a cycle.
const MAX_INTERPOLATION_DEPTH: usize = 10;

/// Largest page size the hub search accepts.
const MAX_ROWS: u32 = 100;

/// How a key behaves when absent from both the section and `DEFAULT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDefault {
    /// Loading fails without it.
    Required,
    /// Only batch commands need it.
    RequiredForBatch,
    /// Falls back to this literal.
    Value(&'static str),
}

/// Description of one recognised configuration key.
#[derive(Debug, Clone, Copy)]
pub struct ConfigKey {
    /// Key name as written in the file.
    pub name: &'static str,
    /// Fallback behaviour.
    pub default: KeyDefault,
    /// One-line description for `make-cfg help`.
    pub help: &'static str,
}

/// Every key the loader accepts, in help order.
pub const CONFIG_KEYS: &[ConfigKey] = &[
    ConfigKey {
        name: "hub",
        default: KeyDefault::Required,
        help: "URL to the data hub.",
    },
    ConfigKey {
        name: "username",
        default: KeyDefault::Required,
        help: "Username to access the data hub.",
    },
    ConfigKey {
        name: "password",
        default: KeyDefault::Required,
        help: "Password to access the data hub.",
    },
    ConfigKey {
        name: "product",
        default: KeyDefault::RequiredForBatch,
        help: "Which data product to download. Required if downloading in batch.",
    },
    ConfigKey {
        name: "platform",
        default: KeyDefault::Value("Sentinel-5"),
        help: "Which satellite to download data for.",
    },
    ConfigKey {
        name: "mode",
        default: KeyDefault::Value("Offline"),
        help: "Which processing mode of the satellite data to download.",
    },
    ConfigKey {
        name: "block_size",
        default: KeyDefault::Value("1M"),
        help: "How much data to write to disk at once. A number, optionally followed by K, M or G.",
    },
    ConfigKey {
        name: "log_block_size",
        default: KeyDefault::Value("50M"),
        help: "How often to report download progress. A number, optionally followed by K, M or G.",
    },
    ConfigKey {
        name: "on_bad_checksum",
        default: KeyDefault::Value("record"),
        help: "What to do if a data file has a bad checksum: \"record\" or \"retry\".",
    },
    ConfigKey {
        name: "num_tries",
        default: KeyDefault::Value("5"),
        help: "How many times to try each request or download before giving up.",
    },
    ConfigKey {
        name: "retry_delay",
        default: KeyDefault::Value("5"),
        help: "Seconds to wait before the first retry; doubles on each further retry.",
    },
    ConfigKey {
        name: "record_file",
        default: KeyDefault::Value("failed_downloads.txt"),
        help: "File to write reports of failed downloads to.",
    },
    ConfigKey {
        name: "output_dir",
        default: KeyDefault::Value("."),
        help: "Directory to save batch downloaded files to.",
    },
    ConfigKey {
        name: "checksum_algorithm",
        default: KeyDefault::Value("md5"),
        help: "Digest used to verify downloads: \"md5\" or \"sha256\".",
    },
    ConfigKey {
        name: "rows",
        default: KeyDefault::Value("50"),
        help: "How many search results to request per page (at most 100).",
    },
];

fn lookup_key(name: &str) -> Option<&'static ConfigKey> {
    CONFIG_KEYS.iter().find(|k| k.name == name)
}

/// A value together with the line it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    value: String,
    line: usize,
}

type Section = BTreeMap<String, Entry>;

/// Parsed INI file: raw key/value pairs per section.
#[derive(Debug, Clone, Default)]
pub struct IniDocument {
    defaults: Section,
    sections: BTreeMap<String, Section>,
}

impl IniDocument {
    /// Parses INI text.
    ///
    /// Keys are case-insensitive; section names are not. `;` and `#` start a
    /// comment line. Keys before the first section header belong to `DEFAULT`.
    ///
    /// # Errors
    ///
    /// Fails on a malformed line or an unknown key, naming the line number.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut doc = Self::default();
        let mut current: Option<String> = None;

        for (line_index, raw_line) in raw.lines().enumerate() {
            let line_no = line_index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(header) = line.strip_prefix('[') {
                let Some(name) = header.strip_suffix(']') else {
                    bail!("Invalid section header on line {line_no}: missing ']'");
                };
                let name = name.trim();
                if name.is_empty() {
                    bail!("Empty section name on line {line_no}");
                }
                if name != DEFAULT_SECTION && doc.sections.contains_key(name) {
                    bail!("Duplicate section '{name}' on line {line_no}");
                }
                if name != DEFAULT_SECTION {
                    doc.sections.insert(name.to_string(), Section::new());
                }
                current = Some(name.to_string());
                continue;
            }

            let Some((raw_key, raw_value)) = split_key_value(line) else {
                bail!("Invalid config syntax on line {line_no}: expected key = value");
            };
            let key = raw_key.trim().to_ascii_lowercase();
            if key.is_empty() {
                bail!("Missing key name on line {line_no}");
            }
            if lookup_key(&key).is_none() {
                bail!("Unknown configuration key: '{key}' on line {line_no}");
            }

            let entry = Entry {
                value: raw_value.trim().to_string(),
                line: line_no,
            };
            let section = match current.as_deref() {
                None | Some(DEFAULT_SECTION) => &mut doc.defaults,
                Some(name) => doc.sections.entry(name.to_string()).or_default(),
            };
            section.insert(key, entry);
        }

        Ok(doc)
    }

    /// Names of the non-default sections, sorted.
    #[must_use]
    pub fn section_names(&self) -> Vec<&str> {
        self.sections.keys().map(String::as_str).collect()
    }

    /// True if `section` exists (`DEFAULT` always does).
    #[must_use]
    pub fn has_section(&self, section: &str) -> bool {
        section == DEFAULT_SECTION || self.sections.contains_key(section)
    }

    fn raw_entry(&self, section: &str, key: &str) -> Option<&Entry> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .or_else(|| self.defaults.get(key))
    }

    /// Looks up `key` in `section`, falling back to `DEFAULT`, with `%(name)s`
    /// references expanded. Returns `None` when the key is in neither.
    ///
    /// # Errors
    ///
    /// Fails when a reference names a missing key, is malformed, or recurses
    /// too deeply.
    pub fn get(&self, section: &str, key: &str) -> Result<Option<String>> {
        let Some(entry) = self.raw_entry(section, key) else {
            return Ok(None);
        };
        self.interpolate(section, &entry.value, 0)
            .with_context(|| {
                format!(
                    "Failed to expand value of `{key}` on line {}",
                    entry.line
                )
            })
            .map(Some)
    }

    fn interpolate(&self, section: &str, value: &str, depth: usize) -> Result<String> {
        if depth > MAX_INTERPOLATION_DEPTH {
            bail!("Interpolation nested deeper than {MAX_INTERPOLATION_DEPTH} levels");
        }

        let mut out = String::with_capacity(value.len());
        let mut rest = value;
        while let Some(pos) = rest.find('%') {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            if let Some(tail) = after.strip_prefix('%') {
                out.push('%');
                rest = tail;
            } else if let Some(reference) = after.strip_prefix('(') {
                let Some(close) = reference.find(")s") else {
                    bail!("Bad interpolation syntax in '{value}': expected %(name)s");
                };
                let name = reference[..close].trim().to_ascii_lowercase();
                let Some(entry) = self.raw_entry(section, &name) else {
                    bail!("Interpolation references missing key '{name}'");
                };
                out.push_str(&self.interpolate(section, &entry.value, depth + 1)?);
                rest = &reference[close + 2..];
            } else {
                bail!("Bad interpolation syntax in '{value}': '%' must be followed by '%' or '('");
            }
        }
        out.push_str(rest);
        Ok(out)
    }

    fn line_of(&self, section: &str, key: &str) -> Option<usize> {
        self.raw_entry(section, key).map(|e| e.line)
    }
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let eq = line.find('=');
    let colon = line.find(':');
    let at = match (eq, colon) {
        (Some(e), Some(c)) => e.min(c),
        (Some(i), None) | (None, Some(i)) => i,
        (None, None) => return None,
    };
    Some((&line[..at], &line[at + 1..]))
}

/// Parses a byte count with an optional binary `K`, `M` or `G` suffix.
///
/// # Errors
///
/// Fails on anything other than digits followed by at most one suffix, or on
/// overflow.
pub fn parse_byte_size(raw: &str) -> Result<u64> {
    let token = raw.trim();
    let (digits, multiplier) = match token.chars().last() {
        Some('K' | 'k') => (&token[..token.len() - 1], 1024_u64),
        Some('M' | 'm') => (&token[..token.len() - 1], 1024 * 1024),
        Some('G' | 'g') => (&token[..token.len() - 1], 1024 * 1024 * 1024),
        _ => (token, 1),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        bail!("Expected a number optionally followed by K, M or G, got '{raw}'");
    }
    let value: u64 = digits
        .parse()
        .with_context(|| format!("Byte size '{raw}' is out of range"))?;
    value
        .checked_mul(multiplier)
        .with_context(|| format!("Byte size '{raw}' is out of range"))
}

/// Typed settings for one config section.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Section the settings were read from.
    pub section: String,
    /// Hub base URL without trailing slash.
    pub hub: String,
    /// Hub account name.
    pub username: String,
    /// Hub account password.
    pub password: String,
    /// Product type; needed for date-range commands.
    pub product: Option<String>,
    /// Platform name used in search queries.
    pub platform: String,
    /// Processing mode used in search queries.
    pub mode: String,
    /// Disk write block size in bytes.
    pub block_size: u64,
    /// Progress logging interval in bytes.
    pub log_block_size: u64,
    /// Handling of checksum mismatches.
    pub on_bad_checksum: BadChecksumPolicy,
    /// Attempts per request or download.
    pub num_tries: u32,
    /// Base delay before the first retry.
    pub retry_delay: Duration,
    /// Failure record path.
    pub record_file: PathBuf,
    /// Directory batch downloads are written to.
    pub output_dir: PathBuf,
    /// Digest algorithm for verification.
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Search page size.
    pub rows: u32,
}

impl HubConfig {
    /// Reads `path` and resolves settings for `section`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, the section does not exist,
    /// a required key is missing, or a value is invalid.
    pub fn load(path: &Path, section: &str) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_ini_str(&raw, section)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))
    }

    /// Resolves settings for `section` from INI text.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn from_ini_str(raw: &str, section: &str) -> Result<Self> {
        let doc = IniDocument::parse(raw)?;
        Self::from_document(&doc, section)
    }

    /// Resolves settings for `section` from a parsed document.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn from_document(doc: &IniDocument, section: &str) -> Result<Self> {
        if !doc.has_section(section) {
            let known = doc.section_names().join(", ");
            bail!("Section '{section}' not found in config (available: {known})");
        }

        let hub = require(doc, section, "hub")?
            .trim_end_matches('/')
            .to_string();
        if hub.is_empty() {
            bail!("Config key `hub` must not be empty");
        }

        let num_tries: u32 = parse_with(doc, section, "num_tries", |v| Ok(v.parse::<u32>()?))?;
        if num_tries == 0 {
            bail!(
                "Invalid config value for `num_tries` on line {}: must be at least 1",
                doc.line_of(section, "num_tries").unwrap_or(0)
            );
        }

        let rows: u32 = parse_with(doc, section, "rows", |v| Ok(v.parse::<u32>()?))?;
        if !(1..=MAX_ROWS).contains(&rows) {
            bail!("Invalid config value for `rows`: {rows}. Expected range: 1..={MAX_ROWS}");
        }

        let block_size = parse_with(doc, section, "block_size", parse_byte_size)?;
        let log_block_size = parse_with(doc, section, "log_block_size", parse_byte_size)?;
        if block_size == 0 || log_block_size == 0 {
            bail!("`block_size` and `log_block_size` must be greater than zero");
        }

        Ok(Self {
            section: section.to_string(),
            hub,
            username: require(doc, section, "username")?,
            password: require(doc, section, "password")?,
            product: doc.get(section, "product")?.filter(|p| !p.is_empty()),
            platform: resolve(doc, section, "platform")?,
            mode: resolve(doc, section, "mode")?,
            block_size,
            log_block_size,
            on_bad_checksum: parse_with(doc, section, "on_bad_checksum", |v| {
                v.parse::<BadChecksumPolicy>().map_err(anyhow::Error::msg)
            })?,
            num_tries,
            retry_delay: Duration::from_secs(parse_with(doc, section, "retry_delay", |v| {
                Ok(v.parse::<u64>()?)
            })?),
            record_file: PathBuf::from(resolve(doc, section, "record_file")?),
            output_dir: PathBuf::from(resolve(doc, section, "output_dir")?),
            checksum_algorithm: parse_with(doc, section, "checksum_algorithm", |v| {
                Ok(v.parse::<ChecksumAlgorithm>()?)
            })?,
            rows,
        })
    }

    /// The product type, or an error naming the section.
    ///
    /// # Errors
    ///
    /// Fails when `product` is unset.
    pub fn require_product(&self) -> Result<&str> {
        self.product.as_deref().with_context(|| {
            format!(
                "Config key `product` is required for batch downloads but is not set in section '{}' or DEFAULT",
                self.section
            )
        })
    }

    /// Hub credentials for basic auth.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.username, &self.password)
    }

    /// Retry policy built from `num_tries`, `on_bad_checksum` and `retry_delay`.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.num_tries, self.on_bad_checksum).with_base_delay(self.retry_delay)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            section: DEFAULT_SECTION.to_string(),
            hub: String::new(),
            username: String::new(),
            password: String::new(),
            product: None,
            platform: "Sentinel-5".to_string(),
            mode: "Offline".to_string(),
            block_size: crate::download::constants::DEFAULT_BLOCK_SIZE,
            log_block_size: crate::download::constants::DEFAULT_LOG_BLOCK_SIZE,
            on_bad_checksum: BadChecksumPolicy::Record,
            num_tries: DEFAULT_NUM_TRIES,
            retry_delay: crate::download::DEFAULT_RETRY_DELAY,
            record_file: PathBuf::from("failed_downloads.txt"),
            output_dir: PathBuf::from("."),
            checksum_algorithm: ChecksumAlgorithm::Md5,
            rows: 50,
        }
    }
}

fn require(doc: &IniDocument, section: &str, key: &str) -> Result<String> {
    doc.get(section, key)?.with_context(|| {
        format!("Required key `{key}` not present in section '{section}' or the DEFAULT section")
    })
}

fn resolve(doc: &IniDocument, section: &str, key: &str) -> Result<String> {
    if let Some(value) = doc.get(section, key)? {
        return Ok(value);
    }
    match lookup_key(key).map(|k| k.default) {
        Some(KeyDefault::Value(default)) => Ok(default.to_string()),
        _ => require(doc, section, key),
    }
}

fn parse_with<T>(
    doc: &IniDocument,
    section: &str,
    key: &str,
    parse: impl FnOnce(&str) -> Result<T>,
) -> Result<T> {
    let value = resolve(doc, section, key)?;
    parse(&value).with_context(|| match doc.line_of(section, key) {
        Some(line) => format!("Invalid `{key}` value '{value}' on line {line}"),
        None => format!("Invalid default for `{key}`: '{value}'"),
    })
}

/// Text printed by `make-cfg help`.
#[must_use]
pub fn config_help() -> String {
    let mut out = String::from("A config file looks like this:\n\n");
    for line in SAMPLE_CONFIG.lines() {
        let _ = writeln!(out, "  {line}");
    }
    out.push_str(
        "
The lines in brackets, e.g. \"[NO2]\", denote sections and the other lines
are key = value pairs. Every section except DEFAULT holds the settings for
one data set; the batch commands take the section name as an argument. Keys
missing from the chosen section are taken from DEFAULT. In the example only
\"product\" is set in NO2, so everything else comes from DEFAULT.

Values may refer to other keys with %(key)s, e.g. output_dir = /data/%(product)s.

Recognised keys, with the value used when a key is set nowhere:

",
    );
    for key in CONFIG_KEYS {
        let default = match key.default {
            KeyDefault::Required => "required".to_string(),
            KeyDefault::RequiredForBatch => "required for batch".to_string(),
            KeyDefault::Value(v) => format!("default: {v}"),
        };
        let _ = writeln!(out, "  {} ({default}) - {}", key.name, key.help);
    }
    out
}

/// Writes [`SAMPLE_CONFIG`] to `path`, refusing to overwrite.
///
/// # Errors
///
/// Fails if `path` exists or cannot be written.
pub fn write_sample_config(path: &Path) -> Result<()> {
    if path.exists() {
        bail!(
            "Refusing to overwrite existing file '{}'",
            path.display()
        );
    }
    fs::write(path, SAMPLE_CONFIG)
        .with_context(|| format!("Failed to write sample config to '{}'", path.display()))
}
