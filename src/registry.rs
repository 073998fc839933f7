//! Point registry resolution.
//!
//! Joins the monitoring-point registry with the model-parameter table on
//! `tag` and produces one static profile per point. This is the single
//! source of truth for point identity — every other stage references
//! points through the profiles resolved here rather than re-reading the
//! registry files.
//!
//! The joined result is persisted once per run as the static artifact and
//! reused unchanged on re-invocation unless the static reset flag is set.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::config::{StaticSettings, TableSource};
use crate::context::RunContext;
use crate::error::{Error, Result};

/// Model parameter names in the order the balance equation consumes them.
pub const PARAMETER_NAMES: [&str; 8] =
    ["w_p", "w_max", "alpha", "m2", "ks", "kc", "theta_min", "theta_max"];

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// Model parameters of one point, as joined from the parameter table.
/// Fields are optional at this stage: the model runner is the place where a
/// missing mandatory parameter becomes fatal for the point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub w_p: Option<f64>,
    pub w_max: Option<f64>,
    pub alpha: Option<f64>,
    pub m2: Option<f64>,
    pub ks: Option<f64>,
    pub kc: Option<f64>,
    pub theta_min: Option<f64>,
    pub theta_max: Option<f64>,
}

impl ModelParams {
    fn from_row(row: &Row) -> Self {
        let get = |name: &str| {
            row.get(name)
                .and_then(|cell| cell.parse::<f64>().ok())
                .filter(|v| v.is_finite())
        };
        Self {
            w_p: get("w_p"),
            w_max: get("w_max"),
            alpha: get("alpha"),
            m2: get("m2"),
            ks: get("ks"),
            kc: get("kc"),
            theta_min: get("theta_min"),
            theta_max: get("theta_max"),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "w_p" => self.w_p,
            "w_max" => self.w_max,
            "alpha" => self.alpha,
            "m2" => self.m2,
            "ks" => self.ks,
            "kc" => self.kc,
            "theta_min" => self.theta_min,
            "theta_max" => self.theta_max,
            _ => None,
        }
    }

    /// The ordered parameter vector `[w_p, w_max, alpha, m2, ks, kc,
    /// theta_min, theta_max]`. Every parameter is mandatory here.
    pub fn ordered_vector(&self, tag: &str) -> Result<[f64; 8]> {
        let mut values = [0.0; 8];
        for (slot, name) in values.iter_mut().zip(PARAMETER_NAMES) {
            *slot = self.get(name).ok_or_else(|| Error::MissingParameter {
                name: name.to_string(),
                tag: tag.to_string(),
            })?;
        }
        Ok(values)
    }
}

/// Static profile of one monitoring point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointProfile {
    /// Point code; synthesized sequentially when the registry has none.
    pub code: String,
    pub name: String,
    /// Unique sanitized identifier; the sharding key for every per-point
    /// artifact path.
    pub tag: String,
    pub catchment: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub params: ModelParams,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolves the point profiles for this run.
///
/// Reads the registry and parameter tables, joins them on `tag`, and
/// persists the result as the static artifact. When a valid artifact is
/// already on disk (and no reset is requested) the cached profiles are
/// returned unchanged without touching the source files.
pub fn resolve(ctx: &RunContext, store: &ArtifactStore, cfg: &StaticSettings) -> Result<Vec<PointProfile>> {
    info!("organize static data ...");

    if ctx.flags.reset_data_static {
        store.reset(ArtifactKind::StaticProfile, None)?;
    }

    if store.exists(ArtifactKind::StaticProfile, None) {
        info!("organize static data ... done (previously saved)");
        return store.read_profiles();
    }

    let registry_rows = load_table(&cfg.registry)?;
    let parameter_rows = load_table(&cfg.parameters)?;

    let profiles = join_tables(&registry_rows, &parameter_rows, &cfg.registry.path())?;

    store.write_profiles(&profiles)?;
    info!(points = profiles.len(), "organize static data ... done");
    Ok(profiles)
}

fn join_tables(registry: &[Row], parameters: &[Row], registry_path: &Path) -> Result<Vec<PointProfile>> {
    let by_tag: HashMap<&str, &Row> = parameters
        .iter()
        .filter_map(|row| row.get("tag").map(|tag| (tag.as_str(), row)))
        .collect();

    let mut seen = HashSet::new();
    let mut profiles = Vec::with_capacity(registry.len());

    for row in registry {
        let name = row.get("name").cloned().ok_or_else(|| Error::Schema {
            column: "name".to_string(),
            path: registry_path.to_path_buf(),
        })?;
        let tag = row.get("tag").cloned().unwrap_or_default();

        if tag.is_empty() {
            return Err(Error::Settings(format!(
                "registry row \"{name}\" produced an empty tag after sanitization"
            )));
        }
        if !seen.insert(tag.clone()) {
            return Err(Error::Settings(format!("duplicate tag \"{tag}\" in registry")));
        }

        let params = match by_tag.get(tag.as_str()) {
            Some(parameter_row) => ModelParams::from_row(parameter_row),
            None => {
                warn!(tag = %tag, "no parameter row for point; parameters left unset");
                ModelParams::default()
            }
        };

        profiles.push(PointProfile {
            code: row.get("code").cloned().unwrap_or_default(),
            name,
            tag,
            catchment: row.get("catchment").cloned().filter(|s| !s.is_empty()),
            longitude: parse_optional(row.get("longitude")),
            latitude: parse_optional(row.get("latitude")),
            params,
        });
    }

    Ok(profiles)
}

fn parse_optional(cell: Option<&String>) -> Option<f64> {
    cell.and_then(|s| s.parse::<f64>().ok()).filter(|v| v.is_finite())
}

// ---------------------------------------------------------------------------
// Table reading
// ---------------------------------------------------------------------------

/// One table row keyed by canonical column names.
type Row = HashMap<String, String>;

fn load_table(cfg: &TableSource) -> Result<Vec<Row>> {
    if cfg.format != "csv" {
        return Err(Error::UnsupportedFormat { format: cfg.format.clone() });
    }

    let path = cfg.path();
    if !path.exists() {
        return Err(Error::MissingInput { path });
    }

    let file = File::open(&path)?;
    parse_table(file, cfg)
}

/// Parses a registry-like table: remaps headers through the declared field
/// map, synthesizes `tag` and `code` when absent, keeps only `valid == 1`
/// rows when a validity column exists, and applies the substring filters.
fn parse_table<R: io::Read>(reader: R, cfg: &TableSource) -> Result<Vec<Row>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(cfg.delimiter_byte())
        .trim(csv::Trim::All)
        .from_reader(reader);

    // Invert the declared canonical -> source map once: headers arrive as
    // source names and leave as canonical names.
    let to_canonical: HashMap<&str, &str> = cfg
        .fields
        .iter()
        .map(|(canonical, source)| (source.as_str(), canonical.as_str()))
        .collect();

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|header| {
            let header = header.trim();
            to_canonical.get(header).map(|&c| c.to_string()).unwrap_or_else(|| header.to_string())
        })
        .collect();

    let has_tag = headers.iter().any(|h| h == "tag");
    let has_valid = headers.iter().any(|h| h == "valid");
    let has_code = headers.iter().any(|h| h == "code");

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record?;
        let mut row = Row::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), cell.trim().to_string());
        }

        if !has_tag {
            let name = row.get("name").cloned().unwrap_or_default();
            row.insert("tag".to_string(), sanitize_tag(&name));
        } else if let Some(tag) = row.get_mut("tag") {
            *tag = tag.trim().to_string();
        }

        rows.push(row);
    }

    // Validity filter first: the sequential code default numbers only the
    // surviving rows.
    if has_valid {
        rows.retain(|row| row.get("valid").map(String::as_str) == Some("1"));
    }

    if !has_code {
        warn!("code column not available; assigning sequential defaults");
        for (i, row) in rows.iter_mut().enumerate() {
            row.insert("code".to_string(), (i + 1).to_string());
        }
    }

    // Substring filters: values compared as strings, deliberately substring
    // rather than equality. Synthesized tag/code columns are filterable
    // like any declared column.
    let mut columns: HashSet<&str> = headers.iter().map(String::as_str).collect();
    columns.insert("tag");
    columns.insert("code");
    for (filter_key, filter_value) in &cfg.filters {
        if columns.contains(filter_key.as_str()) {
            rows.retain(|row| {
                row.get(filter_key)
                    .map(|cell| cell.contains(filter_value.as_str()))
                    .unwrap_or(false)
            });
        }
    }

    Ok(rows)
}

/// Normalizes a point name into a stable identifier: trimmed, lowercased,
/// every non-alphanumeric character replaced by an underscore.
pub fn sanitize_tag(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_source(fields: &[(&str, &str)], filters: &[(&str, &str)]) -> TableSource {
        TableSource {
            folder_name: "data".into(),
            file_name: "registry.csv".to_string(),
            format: "csv".to_string(),
            delimiter: ";".to_string(),
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            filters: filters.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    const REGISTRY_CSV: &str = "\
name;catchment;valid;longitude;latitude
Alpha Creek;arno;1;11.25;43.77
Beta Ridge;arno;0;11.30;43.80
Gamma Field;tevere;1;12.48;41.89
";

    const PARAMETERS_CSV: &str = "\
tag;w_p;w_max;alpha;m2;ks;kc;theta_min;theta_max
alpha_creek;50;350;4;10;0.3;0.8;0.05;0.95
gamma_field;60;400;6;12;0.4;0.9;0.10;0.90
";

    #[test]
    fn test_parse_table_synthesizes_tag_and_code() {
        let cfg = registry_source(&[], &[]);
        let rows = parse_table(REGISTRY_CSV.as_bytes(), &cfg).unwrap();

        // Beta Ridge is dropped by the validity filter, so codes run 1..=2
        // over the survivors.
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("tag").unwrap(), "alpha_creek");
        assert_eq!(rows[0].get("code").unwrap(), "1");
        assert_eq!(rows[1].get("tag").unwrap(), "gamma_field");
        assert_eq!(rows[1].get("code").unwrap(), "2");
    }

    #[test]
    fn test_parse_table_remaps_declared_fields() {
        let csv = "station;basin;valid\nAlpha Creek;arno;1\n";
        let cfg = registry_source(&[("name", "station"), ("catchment", "basin")], &[]);
        let rows = parse_table(csv.as_bytes(), &cfg).unwrap();

        assert_eq!(rows[0].get("name").unwrap(), "Alpha Creek");
        assert_eq!(rows[0].get("catchment").unwrap(), "arno");
    }

    #[test]
    fn test_substring_filter_is_not_equality() {
        let cfg = registry_source(&[], &[("catchment", "arn")]);
        let rows = parse_table(REGISTRY_CSV.as_bytes(), &cfg).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("tag").unwrap(), "alpha_creek");
    }

    #[test]
    fn test_filter_applies_to_synthesized_tag() {
        let cfg = registry_source(&[], &[("tag", "gamma")]);
        let rows = parse_table(REGISTRY_CSV.as_bytes(), &cfg).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("tag").unwrap(), "gamma_field");
    }

    #[test]
    fn test_filter_on_unknown_column_is_ignored() {
        let cfg = registry_source(&[], &[("altitude", "200")]);
        let rows = parse_table(REGISTRY_CSV.as_bytes(), &cfg).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_join_builds_typed_profiles() {
        let cfg = registry_source(&[], &[]);
        let registry = parse_table(REGISTRY_CSV.as_bytes(), &cfg).unwrap();
        let parameters = parse_table(PARAMETERS_CSV.as_bytes(), &cfg).unwrap();

        let profiles = join_tables(&registry, &parameters, Path::new("registry.csv")).unwrap();
        assert_eq!(profiles.len(), 2);

        let alpha = &profiles[0];
        assert_eq!(alpha.tag, "alpha_creek");
        assert_eq!(alpha.catchment.as_deref(), Some("arno"));
        assert_eq!(alpha.params.w_max, Some(350.0));
        assert_eq!(alpha.longitude, Some(11.25));
    }

    #[test]
    fn test_join_without_parameter_row_leaves_params_unset() {
        let cfg = registry_source(&[], &[]);
        let registry = parse_table(REGISTRY_CSV.as_bytes(), &cfg).unwrap();
        let parameters = parse_table("tag;w_p\nalpha_creek;50\n".as_bytes(), &cfg).unwrap();

        let profiles = join_tables(&registry, &parameters, Path::new("registry.csv")).unwrap();
        let gamma = profiles.iter().find(|p| p.tag == "gamma_field").unwrap();
        assert_eq!(gamma.params, ModelParams::default());
    }

    #[test]
    fn test_duplicate_tags_are_rejected() {
        let csv = "name;tag\nAlpha;same\nBeta;same\n";
        let cfg = registry_source(&[], &[]);
        let rows = parse_table(csv.as_bytes(), &cfg).unwrap();

        let result = join_tables(&rows, &[], Path::new("registry.csv"));
        assert!(matches!(result, Err(Error::Settings(_))));
    }

    #[test]
    fn test_ordered_vector_requires_every_parameter() {
        let params = ModelParams {
            w_p: Some(50.0),
            w_max: Some(350.0),
            alpha: Some(4.0),
            m2: Some(10.0),
            ks: Some(0.3),
            kc: Some(0.8),
            theta_min: Some(0.05),
            theta_max: None,
        };

        let result = params.ordered_vector("alpha_creek");
        assert!(matches!(
            result,
            Err(Error::MissingParameter { ref name, .. }) if name == "theta_max"
        ));

        let complete = ModelParams { theta_max: Some(0.95), ..params };
        let vector = complete.ordered_vector("alpha_creek").unwrap();
        assert_eq!(vector, [50.0, 350.0, 4.0, 10.0, 0.3, 0.8, 0.05, 0.95]);
    }

    #[test]
    fn test_sanitize_tag() {
        assert_eq!(sanitize_tag("  Alpha Creek "), "alpha_creek");
        assert_eq!(sanitize_tag("Poggio a Caiano"), "poggio_a_caiano");
        assert_eq!(sanitize_tag("S. Piero-2"), "s__piero_2");
    }

    #[test]
    fn test_unsupported_format_is_rejected() {
        let mut cfg = registry_source(&[], &[]);
        cfg.format = "netcdf".to_string();
        let result = load_table(&cfg);
        assert!(matches!(result, Err(Error::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_missing_registry_file_is_missing_input() {
        let mut cfg = registry_source(&[], &[]);
        cfg.folder_name = "/nonexistent".into();
        let result = load_table(&cfg);
        assert!(matches!(result, Err(Error::MissingInput { .. })));
    }
}
