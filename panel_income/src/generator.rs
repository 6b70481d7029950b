//! Synthetic city-year panel generation.
//!
//! Every city is assigned a region once, and every covariate of every
//! city-year row is drawn from a normal distribution whose parameters come
//! from that region's [`RegionProfile`]. The random number generator is
//! always passed in by the caller so that the same seed reproduces the same
//! table.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use polars::prelude::*;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use statrs::distribution::Normal;
use tracing::{debug, info};

use crate::PanelError;

/// The eight model covariates, in the column order used for every matrix.
pub const COVARIATES: [&str; 8] = [
    "gdp_pc",
    "net_access",
    "edu_exp",
    "med_exp",
    "urban_ratio",
    "policy_index",
    "infra_score",
    "unemp_rate",
];

/// Default prediction target.
pub const RURAL_INCOME: &str = "rural_income";
pub const URBAN_INCOME: &str = "urban_income";

pub const NET_ACCESS_BOUNDS: (f64, f64) = (0.5, 1.0);
pub const URBAN_RATIO_BOUNDS: (f64, f64) = (0.3, 0.95);
pub const UNEMP_RATE_BOUNDS: (f64, f64) = (0.03, 0.15);

/// Geographic region a city belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Region {
    East,
    Central,
    West,
}

impl Region {
    pub const ALL: [Region; 3] = [Region::East, Region::Central, Region::West];

    pub fn as_str(self) -> &'static str {
        match self {
            Region::East => "East",
            Region::Central => "Central",
            Region::West => "West",
        }
    }

    /// Default sampling weight of the region among cities.
    pub fn weight(self) -> f64 {
        match self {
            Region::East => 0.4,
            Region::Central => 0.3,
            Region::West => 0.3,
        }
    }

    /// Default covariate distributions for cities in this region.
    pub fn profile(self) -> RegionProfile {
        match self {
            Region::East => RegionProfile {
                gdp_pc: Gaussian::new(80_000.0, 5_000.0),
                net_access: Gaussian::new(0.90, 0.08),
                edu_exp: Gaussian::new(3_200.0, 300.0),
                med_exp: Gaussian::new(2_800.0, 250.0),
                urban_ratio: Gaussian::new(0.78, 0.08),
                policy_index: Gaussian::new(0.80, 0.10),
                unemp_rate: Gaussian::new(0.045, 0.015),
            },
            Region::Central => RegionProfile {
                gdp_pc: Gaussian::new(50_000.0, 5_000.0),
                net_access: Gaussian::new(0.78, 0.08),
                edu_exp: Gaussian::new(2_400.0, 300.0),
                med_exp: Gaussian::new(2_100.0, 250.0),
                urban_ratio: Gaussian::new(0.62, 0.08),
                policy_index: Gaussian::new(0.65, 0.10),
                unemp_rate: Gaussian::new(0.065, 0.015),
            },
            Region::West => RegionProfile {
                gdp_pc: Gaussian::new(30_000.0, 5_000.0),
                net_access: Gaussian::new(0.65, 0.08),
                edu_exp: Gaussian::new(1_700.0, 300.0),
                med_exp: Gaussian::new(1_500.0, 250.0),
                urban_ratio: Gaussian::new(0.48, 0.08),
                policy_index: Gaussian::new(0.55, 0.10),
                unemp_rate: Gaussian::new(0.085, 0.015),
            },
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| PanelError::InvalidParameter(format!("unknown region: {}", s)))
    }
}

/// Mean and standard deviation of a normal draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Gaussian {
    pub mean: f64,
    pub std_dev: f64,
}

impl Gaussian {
    pub const fn new(mean: f64, std_dev: f64) -> Self {
        Self { mean, std_dev }
    }

    fn distribution(&self) -> Result<Normal, PanelError> {
        Normal::new(self.mean, self.std_dev).map_err(|e| {
            PanelError::InvalidParameter(format!(
                "normal({}, {}): {}",
                self.mean, self.std_dev, e
            ))
        })
    }
}

/// Per-region parameters of the drawn covariates.
///
/// `infra_score` is not part of the profile: it is derived from
/// `net_access` and `urban_ratio`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegionProfile {
    pub gdp_pc: Gaussian,
    pub net_access: Gaussian,
    pub edu_exp: Gaussian,
    pub med_exp: Gaussian,
    pub urban_ratio: Gaussian,
    pub policy_index: Gaussian,
    pub unemp_rate: Gaussian,
}

/// Normal distributions built once per region, in draw order.
struct RegionSampler {
    gdp_pc: Normal,
    net_access: Normal,
    edu_exp: Normal,
    med_exp: Normal,
    urban_ratio: Normal,
    policy_index: Normal,
    unemp_rate: Normal,
}

impl TryFrom<&RegionProfile> for RegionSampler {
    type Error = PanelError;

    fn try_from(p: &RegionProfile) -> Result<Self, Self::Error> {
        Ok(Self {
            gdp_pc: p.gdp_pc.distribution()?,
            net_access: p.net_access.distribution()?,
            edu_exp: p.edu_exp.distribution()?,
            med_exp: p.med_exp.distribution()?,
            urban_ratio: p.urban_ratio.distribution()?,
            policy_index: p.policy_index.distribution()?,
            unemp_rate: p.unemp_rate.distribution()?,
        })
    }
}

/// A region together with its sampling weight and covariate profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSpec {
    pub region: Region,
    pub weight: f64,
    pub profile: RegionProfile,
}

impl From<Region> for RegionSpec {
    fn from(region: Region) -> Self {
        Self {
            region,
            weight: region.weight(),
            profile: region.profile(),
        }
    }
}

/// Shape of the generated panel.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelConfig {
    pub city_count: usize,
    pub years: RangeInclusive<i32>,
    pub regions: Vec<RegionSpec>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            city_count: 100,
            years: 2018..=2022,
            regions: Region::ALL.into_iter().map(RegionSpec::from).collect(),
        }
    }
}

#[derive(Default)]
struct Columns {
    city: Vec<String>,
    year: Vec<i32>,
    region: Vec<&'static str>,
    gdp_pc: Vec<f64>,
    net_access: Vec<f64>,
    edu_exp: Vec<f64>,
    med_exp: Vec<f64>,
    urban_ratio: Vec<f64>,
    policy_index: Vec<f64>,
    infra_score: Vec<f64>,
    unemp_rate: Vec<f64>,
    rural_income: Vec<f64>,
    urban_income: Vec<f64>,
}

impl PanelConfig {
    fn validate(&self) -> Result<(), PanelError> {
        if self.city_count == 0 {
            return Err(PanelError::InvalidParameter(
                "city_count must be positive".to_string(),
            ));
        }
        if self.years.is_empty() {
            return Err(PanelError::InvalidParameter(format!(
                "empty year range {:?}",
                self.years
            )));
        }
        if self.regions.is_empty() {
            return Err(PanelError::InvalidParameter(
                "at least one region is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of rows [`PanelConfig::generate`] will produce.
    pub fn row_count(&self) -> usize {
        self.city_count * self.years.clone().count()
    }

    /// Draws the panel from `rng`.
    ///
    /// Per city the region is drawn first; then, for each year, the seven
    /// profiled covariates in declaration order, the infrastructure noise and
    /// the two income multipliers.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<DataFrame, PanelError> {
        self.validate()?;

        let weights = WeightedIndex::new(self.regions.iter().map(|s| s.weight))
            .map_err(|e| PanelError::InvalidParameter(format!("region weights: {}", e)))?;
        let samplers = self
            .regions
            .iter()
            .map(|s| RegionSampler::try_from(&s.profile))
            .collect::<Result<Vec<_>, _>>()?;
        let infra_noise = Gaussian::new(0.0, 5.0).distribution()?;

        let n = self.row_count();
        let mut cols = Columns::default();
        for v in [
            &mut cols.gdp_pc,
            &mut cols.net_access,
            &mut cols.edu_exp,
            &mut cols.med_exp,
            &mut cols.urban_ratio,
            &mut cols.policy_index,
            &mut cols.infra_score,
            &mut cols.unemp_rate,
            &mut cols.rural_income,
            &mut cols.urban_income,
        ] {
            v.reserve(n);
        }

        for c in 0..self.city_count {
            let region_idx = weights.sample(rng);
            let region = self.regions[region_idx].region;
            let s = &samplers[region_idx];
            let city = format!("City_{:03}", c + 1);

            for year in self.years.clone() {
                let gdp_pc = s.gdp_pc.sample(rng);
                let net_access = clip(s.net_access.sample(rng), NET_ACCESS_BOUNDS);
                let edu_exp = s.edu_exp.sample(rng);
                let med_exp = s.med_exp.sample(rng);
                let urban_ratio = clip(s.urban_ratio.sample(rng), URBAN_RATIO_BOUNDS);
                let policy_index = s.policy_index.sample(rng);
                let unemp_rate = clip(s.unemp_rate.sample(rng), UNEMP_RATE_BOUNDS);
                let infra_score = 50.0 * net_access + 30.0 * urban_ratio + infra_noise.sample(rng);
                let rural_income =
                    gdp_pc * rng.gen_range(0.3..0.5) + 5000.0 * policy_index - 2000.0 * unemp_rate;
                let urban_income = gdp_pc * rng.gen_range(0.6..0.9);

                cols.city.push(city.clone());
                cols.year.push(year);
                cols.region.push(region.as_str());
                cols.gdp_pc.push(gdp_pc);
                cols.net_access.push(net_access);
                cols.edu_exp.push(edu_exp);
                cols.med_exp.push(med_exp);
                cols.urban_ratio.push(urban_ratio);
                cols.policy_index.push(policy_index);
                cols.infra_score.push(infra_score);
                cols.unemp_rate.push(unemp_rate);
                cols.rural_income.push(rural_income);
                cols.urban_income.push(urban_income);
            }
        }

        let df = df!(
            "city" => cols.city,
            "year" => cols.year,
            "region" => cols.region,
            "gdp_pc" => cols.gdp_pc,
            "net_access" => cols.net_access,
            "edu_exp" => cols.edu_exp,
            "med_exp" => cols.med_exp,
            "urban_ratio" => cols.urban_ratio,
            "policy_index" => cols.policy_index,
            "infra_score" => cols.infra_score,
            "unemp_rate" => cols.unemp_rate,
            "rural_income" => cols.rural_income,
            "urban_income" => cols.urban_income
        )?;
        info!(
            rows = df.height(),
            cities = self.city_count,
            "generated synthetic panel"
        );
        debug!(years = ?self.years, regions = self.regions.len(), "panel shape");
        Ok(df)
    }
}

fn clip(value: f64, (lo, hi): (f64, f64)) -> f64 {
    value.clamp(lo, hi)
}

/// Generates the default panel layout for `city_count` cities over `years`
/// from a `StdRng` seeded with `seed`.
pub fn generate_panel(
    seed: u64,
    city_count: usize,
    years: RangeInclusive<i32>,
) -> Result<DataFrame, PanelError> {
    let config = PanelConfig {
        city_count,
        years,
        ..PanelConfig::default()
    };
    let mut rng = StdRng::seed_from_u64(seed);
    config.generate(&mut rng)
}
