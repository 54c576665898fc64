use std::fmt;

use serde::Serialize;

/// One answer-production mode. Variants are declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Raw,
    Baseline,
    Extractor,
    Filter,
    ExtractorFilter,
    LongDoc,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::Raw,
        Strategy::Baseline,
        Strategy::Extractor,
        Strategy::Filter,
        Strategy::ExtractorFilter,
        Strategy::LongDoc,
    ];

    /// Field name of the answer in cache records; also the cache file stem.
    pub fn cache_key(self) -> &'static str {
        match self {
            Self::Raw => "raw_pred",
            Self::Baseline => "rb_pred",
            Self::Extractor => "ext_pred",
            Self::Filter => "fil_pred",
            Self::ExtractorFilter => "ext_fil_pred",
            Self::LongDoc => "rl_pred",
        }
    }

    /// Label used in result files.
    pub fn label(self) -> &'static str {
        match self {
            Self::Raw => "raw_pre",
            Self::Baseline => "R&B",
            Self::Extractor => "Ext",
            Self::Filter => "Fil",
            Self::ExtractorFilter => "E&F",
            Self::LongDoc => "R&L",
        }
    }

    pub fn uses_retrieval(self) -> bool {
        !matches!(self, Self::Raw)
    }

    pub fn needs_filter(self) -> bool {
        matches!(self, Self::Filter | Self::ExtractorFilter)
    }

    pub fn needs_extractor(self) -> bool {
        matches!(self, Self::Extractor | Self::ExtractorFilter)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
