//! Weather resources, their variable naming and the metrics they carry.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// A family of weather datasets stored under a common root directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WeatherResource {
    #[serde(rename = "ECLIPS2")]
    Eclips2,
    #[serde(rename = "ECLIPS2TMPLT")]
    Eclips2Template,
    #[serde(rename = "EObs_v23")]
    EObs,
    #[serde(rename = "HARMONIE_V2")]
    Harmonie,
}

impl WeatherResource {
    pub const ALL: [WeatherResource; 4] = [
        WeatherResource::Eclips2,
        WeatherResource::Eclips2Template,
        WeatherResource::EObs,
        WeatherResource::Harmonie,
    ];

    /// Directory under the weather root holding this resource.
    pub fn dir_name(&self) -> &'static str {
        match self {
            WeatherResource::Eclips2 => "ECLIPS2",
            WeatherResource::Eclips2Template => "ECLIPS2TMPLT",
            WeatherResource::EObs => "EObs_v23",
            WeatherResource::Harmonie => "HARMONIE_V2",
        }
    }

    /// Name used in resource keys and reports, e.g. `HARMONIE`.
    pub fn short_name(&self) -> &'static str {
        let dir = self.dir_name();
        dir.split('_').next().unwrap_or(dir)
    }

    /// Built-in variable names and file name tokens.
    pub fn default_definition(&self) -> ResourceDefinition {
        let (precip, tas, tokens): (&str, &str, &[&str]) = match self {
            WeatherResource::Eclips2 => ("Precipalign", "Tairalign", &["PPT", "Tave"]),
            WeatherResource::Eclips2Template => ("Band1", "Band1", &["PPT", "Tave"]),
            WeatherResource::EObs => ("pp", "tg", &["rr", "tg"]),
            WeatherResource::Harmonie => ("Precipalign", "Tairalign", &["cruhar_v3_1_19"]),
        };
        ResourceDefinition {
            precip_var: precip.to_string(),
            tas_var: tas.to_string(),
            file_tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl fmt::Display for WeatherResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for WeatherResource {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.dir_name().eq_ignore_ascii_case(s) || r.short_name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CommonError::UnknownResource(s.to_string()))
    }
}

/// Variable names and file name tokens of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub precip_var: String,
    pub tas_var: String,
    /// A dataset belongs to the resource when its file name contains any token.
    pub file_tokens: Vec<String>,
}

impl ResourceDefinition {
    pub fn matches(&self, file_name: &str) -> bool {
        self.file_tokens.iter().any(|t| file_name.contains(t.as_str()))
    }

    fn validate(&self, resource: WeatherResource) -> CommonResult<()> {
        let invalid = |message: &str| CommonError::InvalidResource {
            resource: resource.to_string(),
            message: message.to_string(),
        };

        if self.precip_var.trim().is_empty() {
            return Err(invalid("precip_var must not be empty"));
        }
        if self.tas_var.trim().is_empty() {
            return Err(invalid("tas_var must not be empty"));
        }
        if self.file_tokens.is_empty() {
            return Err(invalid("at least one file token is required"));
        }
        if self.file_tokens.iter().any(|t| t.trim().is_empty()) {
            return Err(invalid("file tokens must not be empty"));
        }
        Ok(())
    }
}

/// Explicit resource → definition table, validated once at load time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceTable {
    entries: BTreeMap<WeatherResource, ResourceDefinition>,
}

impl Default for ResourceTable {
    fn default() -> Self {
        let entries = [
            WeatherResource::Eclips2,
            WeatherResource::Eclips2Template,
            WeatherResource::Harmonie,
        ]
        .into_iter()
        .map(|r| (r, r.default_definition()))
        .collect();
        Self { entries }
    }
}

impl ResourceTable {
    /// Build a table from explicit entries, rejecting duplicates and empty fields.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (WeatherResource, ResourceDefinition)>,
    ) -> CommonResult<Self> {
        let mut map = BTreeMap::new();
        for (resource, defn) in entries {
            if map.insert(resource, defn).is_some() {
                return Err(CommonError::InvalidResource {
                    resource: resource.to_string(),
                    message: "defined more than once".to_string(),
                });
            }
        }
        let table = Self { entries: map };
        table.validate()?;
        Ok(table)
    }

    pub fn validate(&self) -> CommonResult<()> {
        if self.entries.is_empty() {
            return Err(CommonError::InvalidResource {
                resource: "*".to_string(),
                message: "resource table is empty".to_string(),
            });
        }
        for (resource, defn) in &self.entries {
            defn.validate(*resource)?;
        }
        Ok(())
    }

    pub fn get(&self, resource: WeatherResource) -> CommonResult<&ResourceDefinition> {
        self.entries
            .get(&resource)
            .ok_or_else(|| CommonError::UnknownResource(resource.to_string()))
    }

    /// Restrict the table to `resources`, failing on any that are not defined.
    pub fn select(&self, resources: &[WeatherResource]) -> CommonResult<Self> {
        let entries = resources
            .iter()
            .map(|r| Ok((*r, self.get(*r)?.clone())))
            .collect::<CommonResult<BTreeMap<_, _>>>()?;
        Ok(Self { entries })
    }

    pub fn iter(&self) -> impl Iterator<Item = (WeatherResource, &ResourceDefinition)> {
        self.entries.iter().map(|(r, d)| (*r, d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Climate metric processed by the reorganisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Precipitation,
    Temperature,
}

impl Metric {
    pub const ALL: [Metric; 2] = [Metric::Precipitation, Metric::Temperature];

    /// Prefix of input file names and directories, e.g. `PPT04_196190.nc`.
    pub fn input_prefix(&self) -> &'static str {
        match self {
            Metric::Precipitation => "PPT",
            Metric::Temperature => "Tave",
        }
    }

    /// Variable name in the target dataset.
    pub fn target_variable(&self) -> &'static str {
        match self {
            Metric::Precipitation => "Precipalign",
            Metric::Temperature => "Tairalign",
        }
    }

    /// Variable name in a dataset of the given resource.
    pub fn resource_variable<'a>(&self, defn: &'a ResourceDefinition) -> &'a str {
        match self {
            Metric::Precipitation => &defn.precip_var,
            Metric::Temperature => &defn.tas_var,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Metric::Precipitation => "precipitation",
            Metric::Temperature => "temperature",
        }
    }

    pub fn units(&self) -> &'static str {
        match self {
            Metric::Precipitation => "mm",
            Metric::Temperature => "degrees C",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl FromStr for Metric {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| {
                [m.input_prefix(), m.target_variable(), m.description()]
                    .iter()
                    .any(|name| name.eq_ignore_ascii_case(s))
            })
            .ok_or_else(|| CommonError::UnknownMetric(s.to_string()))
    }
}

/// Emission scenario of a future climate projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scenario {
    Rcp26,
    Rcp45,
    Rcp60,
    Rcp85,
}

impl Scenario {
    pub fn name(&self) -> &'static str {
        match self {
            Scenario::Rcp26 => "RCP26",
            Scenario::Rcp45 => "RCP45",
            Scenario::Rcp60 => "RCP60",
            Scenario::Rcp85 => "RCP85",
        }
    }

    /// Suffix appended to GCM directory names, e.g. `_4.5`.
    pub fn suffix(&self) -> &'static str {
        match self {
            Scenario::Rcp26 => "_2.6",
            Scenario::Rcp45 => "_4.5",
            Scenario::Rcp60 => "_6.0",
            Scenario::Rcp85 => "_8.5",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scenario {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('.', "").as_str() {
            "RCP26" => Ok(Scenario::Rcp26),
            "RCP45" => Ok(Scenario::Rcp45),
            "RCP60" => Ok(Scenario::Rcp60),
            "RCP85" => Ok(Scenario::Rcp85),
            _ => Err(CommonError::InvalidResource {
                resource: s.to_string(),
                message: "unknown scenario".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table() {
        let table = ResourceTable::default();
        assert_eq!(table.len(), 3);
        table.validate().unwrap();

        let harmonie = table.get(WeatherResource::Harmonie).unwrap();
        assert_eq!(harmonie.precip_var, "Precipalign");
        assert!(harmonie.matches("cruhar_v3_1_19_precip.nc"));
        assert!(table.get(WeatherResource::EObs).is_err());
    }

    #[test]
    fn test_duplicate_and_empty_entries_rejected() {
        let defn = WeatherResource::Eclips2.default_definition();
        let result = ResourceTable::from_entries(vec![
            (WeatherResource::Eclips2, defn.clone()),
            (WeatherResource::Eclips2, defn.clone()),
        ]);
        assert!(result.is_err());

        let mut empty = defn;
        empty.file_tokens.clear();
        assert!(ResourceTable::from_entries(vec![(WeatherResource::Eclips2, empty)]).is_err());
    }

    #[test]
    fn test_table_from_yaml() {
        let yaml = r#"
HARMONIE_V2:
  precip_var: Precipalign
  tas_var: Tairalign
  file_tokens: [cruhar]
EObs_v23:
  precip_var: pp
  tas_var: tg
  file_tokens: [rr, tg]
"#;
        let table: ResourceTable = serde_yaml::from_str(yaml).unwrap();
        table.validate().unwrap();
        assert_eq!(table.get(WeatherResource::EObs).unwrap().tas_var, "tg");
    }

    #[test]
    fn test_resource_names() {
        assert_eq!(WeatherResource::Harmonie.short_name(), "HARMONIE");
        assert_eq!(WeatherResource::EObs.short_name(), "EObs");
        assert_eq!("harmonie".parse::<WeatherResource>().unwrap(), WeatherResource::Harmonie);
        assert!("CRU".parse::<WeatherResource>().is_err());
    }

    #[test]
    fn test_metric_naming() {
        assert_eq!("PPT".parse::<Metric>().unwrap(), Metric::Precipitation);
        assert_eq!("Tairalign".parse::<Metric>().unwrap(), Metric::Temperature);
        assert_eq!(Metric::Temperature.input_prefix(), "Tave");

        let defn = WeatherResource::Eclips2Template.default_definition();
        assert_eq!(Metric::Precipitation.resource_variable(&defn), "Band1");
    }

    #[test]
    fn test_scenario_suffix() {
        assert_eq!("RCP4.5".parse::<Scenario>().unwrap(), Scenario::Rcp45);
        assert_eq!(Scenario::Rcp85.suffix(), "_8.5");
    }
}
