//! Region computation and the refresh schedule.
//!
//! [`Pipeline`] runs fetch, ensemble, aggregate, bias and classify for one
//! region. [`ScheduleDriver`] owns the per-cycle context, recomputes every
//! region on each trigger and hands the bulletin to the renderers.

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, warn};

use crate::cache::{CycleCache, cycle_key};
use crate::catalog::{Region, RegionCatalog};
use crate::config::PipelineConfig;
use crate::error::BulletinError;
use crate::output::Renderer;
use crate::pipeline::aggregate::{
    daily_means, forward_from, history_before, horizon_buckets, merge_cloudiest,
};
use crate::pipeline::bias::{BiasCorrector, correct};
use crate::pipeline::classify::{Bucket, Classifier};
use crate::pipeline::ensemble::Ensembler;
use crate::pipeline::fetcher::SeriesFetcher;
use crate::pipeline::types::{
    Bulletin, Classified, DayForecast, HorizonForecast, HourlyForecast, RegionForecast,
    RegionStatus, StateForecast, Timestamp, ist, to_ist,
};
use crate::pipeline::utility::round_to;
use crate::providers::FetchWindow;

pub const SCHEMA_VERSION: u8 = 1;
pub const INTERVAL_HOURS: u32 = 3;

pub struct Pipeline {
    fetcher: SeriesFetcher,
    ensembler: Ensembler,
    classifier: Classifier,
    corrector: BiasCorrector,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, fetcher: SeriesFetcher, corrector: BiasCorrector) -> Self {
        Self {
            fetcher,
            ensembler: Ensembler::new(config.layer_weights, config.smoothing),
            classifier: config.classifier(),
            corrector,
            config,
        }
    }

    pub fn corrector(&self) -> &BiasCorrector {
        &self.corrector
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    fn classify(&self, raw: Option<f64>, bias: f64, previous: Option<Bucket>) -> Classified {
        let Some(raw) = raw else {
            return Classified::default();
        };
        let percent = round_to(correct(raw, bias), 0);
        Classified {
            raw_percent: Some(raw),
            percent: Some(percent),
            bucket: Some(self.classifier.classify_with(percent, previous)),
        }
    }

    /// Computes one region's forecast. `previous` supplies the buckets used
    /// for hysteresis.
    ///
    /// # Errors
    ///
    /// [`BulletinError::NoDataForRegion`] when every provider/point failed.
    #[tracing::instrument(skip(self, region, previous), fields(region_id = %region.id))]
    pub async fn compute_region(
        &self,
        region: &Region,
        now: DateTime<Utc>,
        bias: f64,
        previous: Option<&RegionForecast>,
    ) -> Result<RegionForecast, BulletinError> {
        let window = FetchWindow::new(now, self.config.history_hours, self.config.horizon_hours);
        let fetched = self.fetcher.fetch_region(region, window).await;
        if !fetched.failures.is_empty() {
            warn!(
                failed = fetched.failures.len(),
                succeeded = fetched.succeeded(),
                "Some provider fetches failed"
            );
        }

        let ensemble = self.ensembler.ensemble(&region.id, fetched.by_provider)?;
        let now_ist = to_ist(now);
        let today = now_ist.date_naive();
        let forward = forward_from(&ensemble.points, now_ist);

        let prev_day = |date: NaiveDate| {
            previous
                .and_then(|p| p.days.iter().find(|d| d.date == date))
                .and_then(|d| d.value.bucket)
        };
        let days = daily_means(
            &ensemble.points,
            &ensemble.irradiance,
            self.config.solar_window,
            region.points.first().copied(),
        )
            .into_iter()
            .filter(|d| d.date >= today)
            .map(|d| DayForecast {
                date: d.date,
                value: self.classify(d.percent, bias, prev_day(d.date)),
                ghi_wm2: d.ghi_wm2,
            })
            .collect();

        let prev_horizon = |day: u8| {
            previous
                .and_then(|p| p.horizon.iter().find(|h| h.day == day))
                .and_then(|h| h.value.bucket)
        };
        let horizon = horizon_buckets(forward, self.config.horizon_hours as usize)
            .into_iter()
            .map(|h| HorizonForecast {
                day: h.day,
                value: self.classify(h.percent, bias, prev_horizon(h.day)),
            })
            .collect();

        let prev_hour = |time: Timestamp| {
            previous
                .and_then(|p| p.hourly.iter().find(|h| h.time == time))
                .and_then(|h| h.value.bucket)
        };
        let hourly = forward
            .iter()
            .take(self.config.horizon_hours as usize)
            .map(|p| HourlyForecast {
                time: p.time,
                daylight: self.config.daylight_window.contains(p.time),
                value: self.classify(p.value, bias, prev_hour(p.time)),
            })
            .collect();

        let history = history_before(&ensemble.points, now_ist, self.config.history_hours as usize);

        debug!(
            providers = ensemble.providers.len(),
            hours = ensemble.points.len(),
            bias,
            "Region computed"
        );

        Ok(RegionForecast {
            region_id: region.id.clone(),
            state: region.state.clone(),
            name: region.name.clone(),
            status: RegionStatus::Fresh,
            computed_at: Some(now),
            providers: ensemble.providers,
            bias,
            days,
            horizon,
            hourly,
            series: ensemble.points,
            history,
        })
    }
}

/// Cloudier-wins merge of several regions into their parent state.
pub fn merge_state(state: &str, members: &[&RegionForecast]) -> StateForecast {
    let mut dates: Vec<NaiveDate> = members
        .iter()
        .flat_map(|m| m.days.iter().map(|d| d.date))
        .collect();
    dates.sort();
    dates.dedup();

    let days = dates
        .into_iter()
        .map(|date| {
            let same_day: Vec<&DayForecast> = members
                .iter()
                .filter_map(|m| m.days.iter().find(|d| d.date == date))
                .collect();
            DayForecast {
                date,
                value: merge_cloudiest(same_day.iter().map(|d| &d.value)),
                ghi_wm2: same_day
                    .iter()
                    .filter_map(|d| d.ghi_wm2)
                    .reduce(f64::min),
            }
        })
        .collect();

    let horizon_days = members.iter().map(|m| m.horizon.len()).max().unwrap_or(0);
    let horizon = (1..=horizon_days as u8)
        .map(|day| HorizonForecast {
            day,
            value: merge_cloudiest(
                members
                    .iter()
                    .filter_map(|m| m.horizon.iter().find(|h| h.day == day))
                    .map(|h| &h.value),
            ),
        })
        .collect();

    StateForecast {
        state: state.to_string(),
        members: members.iter().map(|m| m.region_id.clone()).collect(),
        days,
        horizon,
    }
}

pub fn merge_states(
    catalog: &RegionCatalog,
    regions: &BTreeMap<String, RegionForecast>,
) -> BTreeMap<String, StateForecast> {
    catalog
        .merge_groups()
        .into_iter()
        .map(|(state, ids)| {
            let members: Vec<&RegionForecast> = ids.iter().filter_map(|id| regions.get(id)).collect();
            (state.clone(), merge_state(&state, &members))
        })
        .collect()
}

/// Every region (and merged state) at hour `index` of the forecast,
/// clamped into the available hours.
pub fn hour_snapshot(bulletin: &Bulletin, index: usize) -> BTreeMap<String, Classified> {
    let mut out: BTreeMap<String, Classified> = bulletin
        .regions
        .iter()
        .map(|(id, r)| {
            let value = if r.hourly.is_empty() {
                Classified::default()
            } else {
                r.hourly[index.min(r.hourly.len() - 1)].value
            };
            (id.clone(), value)
        })
        .collect();

    for (state, merged) in &bulletin.states {
        let members: Vec<Classified> = merged
            .members
            .iter()
            .filter_map(|id| out.get(id).copied())
            .collect();
        out.insert(state.clone(), merge_cloudiest(&members));
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Fixed 3-hour boundary in IST (03:00, 06:00, ...).
    Interval,
    /// IST midnight; invalidates the daily cache.
    MidnightRollover,
    Manual,
}

/// Next 3-hour IST boundary strictly after `now`, and which trigger it is.
pub fn next_trigger(now: DateTime<Utc>) -> (DateTime<Utc>, Trigger) {
    let local = to_ist(now);
    let next_hour = (local.hour() / INTERVAL_HOURS + 1) * INTERVAL_HOURS;
    let date = local.date_naive();
    let (date, hour, trigger) = if next_hour >= 24 {
        (date + Duration::days(1), 0, Trigger::MidnightRollover)
    } else {
        (date, next_hour, Trigger::Interval)
    };
    let at = date
        .and_hms_opt(hour, 0, 0)
        .and_then(|naive| ist().from_local_datetime(&naive).single())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(now + Duration::hours(INTERVAL_HOURS as i64));
    (at, trigger)
}

/// State carried between cycles. Only the bias store outlives the process.
#[derive(Debug, Default)]
pub struct PipelineContext {
    pub results: BTreeMap<String, RegionForecast>,
    pub day: Option<NaiveDate>,
    pub cycles: u64,
}

impl PipelineContext {
    /// Seeds the context from a previously published bulletin so stale
    /// fallback and hysteresis survive a restart.
    pub fn from_bulletin(bulletin: Bulletin) -> Self {
        Self {
            day: Some(to_ist(bulletin.generated_at).date_naive()),
            results: bulletin.regions,
            cycles: 0,
        }
    }
}

pub struct ScheduleDriver {
    pipeline: Arc<Pipeline>,
    catalog: RegionCatalog,
    context: PipelineContext,
    renderers: Vec<Box<dyn Renderer>>,
    cache: Option<CycleCache>,
}

impl ScheduleDriver {
    pub fn new(pipeline: Arc<Pipeline>, catalog: RegionCatalog) -> Self {
        Self {
            pipeline,
            catalog,
            context: PipelineContext::default(),
            renderers: Vec::new(),
            cache: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderers.push(renderer);
        self
    }

    pub fn with_cache(mut self, cache: CycleCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_context(mut self, context: PipelineContext) -> Self {
        self.context = context;
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Recomputes every region and renders the result. Region failures keep
    /// the previous result (stale) or an explicit no-data entry.
    #[tracing::instrument(skip(self), fields(cycle = %cycle_key(now)))]
    pub async fn run_cycle(&mut self, now: DateTime<Utc>, trigger: Trigger) -> Result<Bulletin> {
        let today = to_ist(now).date_naive();
        if trigger == Trigger::MidnightRollover || self.context.day.is_some_and(|d| d != today) {
            info!(date = %today, "Civil day rolled over, dropping daily cache");
            if let Some(cache) = &self.cache
                && let Err(e) = cache.purge_except(&cycle_key(now))
            {
                warn!(error = %e, "Failed to purge stale cache entries");
            }
        }
        self.context.day = Some(today);
        self.context.cycles += 1;

        let ids: Vec<&str> = self.catalog.regions().iter().map(|r| r.id.as_str()).collect();
        let biases = match self.pipeline.corrector().snapshot(ids).await {
            Ok(b) => b,
            Err(e) => {
                error!(error = %e, "Bias store unreadable, classifying without correction");
                HashMap::new()
            }
        };

        let mut tasks = vec![];
        for region in self.catalog.regions() {
            let pipeline = self.pipeline.clone();
            let region_id = region.id.clone();
            let region = region.clone();
            let previous = self.context.results.get(&region.id).cloned();
            let bias = biases.get(&region.id).copied().unwrap_or(0.0);
            let span = tracing::info_span!("region_task", region_id = %region.id);

            let task = tokio::spawn(
                async move { pipeline.compute_region(&region, now, bias, previous.as_ref()).await }
                    .instrument(span),
            );
            tasks.push((region_id, task));
        }

        let (mut fresh, mut stale, mut missing) = (0usize, 0usize, 0usize);
        for (region_id, task) in tasks {
            let outcome = match task.await {
                Ok(result) => result.map_err(anyhow::Error::from),
                Err(e) => Err(anyhow::anyhow!("region task panicked: {e}")),
            };
            match outcome {
                Ok(forecast) => {
                    fresh += 1;
                    self.context.results.insert(region_id, forecast);
                }
                Err(e) => {
                    error!(region_id = %region_id, error = %e, "Region computation failed");
                    match self.context.results.get_mut(&region_id) {
                        Some(previous) if previous.status != RegionStatus::NoData => {
                            stale += 1;
                            previous.status = RegionStatus::Stale;
                        }
                        _ => {
                            missing += 1;
                            if let Some(region) = self.catalog.get(&region_id) {
                                self.context.results.insert(
                                    region_id.clone(),
                                    RegionForecast::no_data(&region.id, &region.state, &region.name),
                                );
                            }
                        }
                    }
                }
            }
        }

        self.context
            .results
            .retain(|id, _| self.catalog.get(id).is_some());

        let bulletin = Bulletin {
            schema_version: SCHEMA_VERSION,
            generated_at: now,
            cycle: cycle_key(now),
            states: merge_states(&self.catalog, &self.context.results),
            regions: self.context.results.clone(),
        };
        info!(fresh, stale, no_data = missing, ?trigger, "Cycle complete");

        if let Some(cache) = &self.cache
            && let Err(e) = cache.save(&bulletin)
        {
            warn!(error = %e, "Failed to write cycle cache");
        }
        for renderer in &self.renderers {
            if let Err(e) = renderer.render(&bulletin).await {
                error!(renderer = renderer.name(), error = %e, "Renderer failed");
            }
        }
        Ok(bulletin)
    }

    /// Runs an immediate cycle, then one per trigger. `max_cycles == 0` runs forever.
    pub async fn run(&mut self, max_cycles: usize) -> Result<()> {
        let mut count = 0;
        let mut trigger = Trigger::Manual;
        loop {
            self.run_cycle(Utc::now(), trigger).await?;
            count += 1;
            if max_cycles > 0 && count >= max_cycles {
                break;
            }

            let (at, next) = next_trigger(Utc::now());
            let wait = (at - Utc::now()).to_std().unwrap_or_default();
            info!(next_at = %to_ist(at), trigger = ?next, wait_secs = wait.as_secs(), "Waiting for next trigger");
            tokio::time::sleep(wait).await;
            trigger = next;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forecast(id: &str, day1: Option<f64>, bucket: Option<Bucket>) -> RegionForecast {
        let mut f = RegionForecast::no_data(id, "Rajasthan", id);
        f.status = RegionStatus::Fresh;
        f.horizon = vec![HorizonForecast {
            day: 1,
            value: Classified {
                raw_percent: day1,
                percent: day1,
                bucket,
            },
        }];
        f
    }

    #[test]
    fn test_merge_state_takes_cloudier_member() {
        let west = forecast("W", Some(20.0), Some(Bucket::Low));
        let east = forecast("E", Some(70.0), Some(Bucket::High));
        let merged = merge_state("Rajasthan", &[&west, &east]);

        assert_eq!(merged.horizon[0].value.percent, Some(70.0));
        assert_eq!(merged.horizon[0].value.bucket, Some(Bucket::High));
        assert_eq!(merged.members, vec!["W", "E"]);
    }

    #[test]
    fn test_merge_state_pairs_percent_with_its_own_bucket() {
        // West rose to 32% but hysteresis held it at Low; East fell to 28%
        // and is still Medium.
        let west = forecast("W", Some(32.0), Some(Bucket::Low));
        let east = forecast("E", Some(28.0), Some(Bucket::Medium));
        let merged = merge_state("Rajasthan", &[&west, &east]);
        assert_eq!(merged.horizon[0].value, west.horizon[0].value);

        let hour = |f: &RegionForecast| HourlyForecast {
            time: to_ist(Utc.with_ymd_and_hms(2026, 10, 19, 4, 30, 0).unwrap()),
            daylight: true,
            value: f.horizon[0].value,
        };
        let (mut w, mut e) = (west.clone(), east.clone());
        w.hourly = vec![hour(&west)];
        e.hourly = vec![hour(&east)];
        let bulletin = Bulletin {
            schema_version: SCHEMA_VERSION,
            generated_at: Utc::now(),
            cycle: "c".into(),
            states: BTreeMap::from([("Rajasthan".to_string(), merged)]),
            regions: BTreeMap::from([("W".to_string(), w), ("E".to_string(), e)]),
        };
        let snap = hour_snapshot(&bulletin, 0);
        assert_eq!(snap["Rajasthan"].percent, Some(32.0));
        assert_eq!(snap["Rajasthan"].bucket, Some(Bucket::Low));
    }

    #[test]
    fn test_merge_state_all_missing_is_no_data() {
        let west = forecast("W", None, None);
        let east = forecast("E", None, None);
        let merged = merge_state("Rajasthan", &[&west, &east]);
        assert_eq!(merged.horizon[0].value, Classified::default());
    }

    #[test]
    fn test_next_trigger_interval() {
        // 10:40 IST
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 5, 10, 0).unwrap();
        let (at, trigger) = next_trigger(now);
        assert_eq!(trigger, Trigger::Interval);
        assert_eq!(to_ist(at).hour(), 12);
        assert_eq!(to_ist(at).minute(), 0);
    }

    #[test]
    fn test_next_trigger_midnight() {
        // 22:15 IST
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 16, 45, 0).unwrap();
        let (at, trigger) = next_trigger(now);
        assert_eq!(trigger, Trigger::MidnightRollover);
        assert_eq!(to_ist(at).to_rfc3339(), "2026-10-20T00:00:00+05:30");
    }

    #[test]
    fn test_hour_snapshot_clamps_and_merges() {
        let mut west = forecast("W", None, None);
        west.hourly = vec![HourlyForecast {
            time: to_ist(Utc.with_ymd_and_hms(2026, 10, 19, 4, 30, 0).unwrap()),
            daylight: true,
            value: Classified {
                raw_percent: Some(60.0),
                percent: Some(60.0),
                bucket: Some(Bucket::High),
            },
        }];
        let east = forecast("E", None, None);
        let mut regions = BTreeMap::new();
        regions.insert("W".to_string(), west.clone());
        regions.insert("E".to_string(), east.clone());
        let bulletin = Bulletin {
            schema_version: SCHEMA_VERSION,
            generated_at: Utc::now(),
            cycle: "c".into(),
            states: BTreeMap::from([(
                "Rajasthan".to_string(),
                merge_state("Rajasthan", &[&west, &east]),
            )]),
            regions,
        };

        let snap = hour_snapshot(&bulletin, 30);
        assert_eq!(snap["W"].bucket, Some(Bucket::High));
        assert_eq!(snap["E"].bucket, None);
        assert_eq!(snap["Rajasthan"].bucket, Some(Bucket::High));
    }
}
