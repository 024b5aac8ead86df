//! DWML response parsing
//!
//! The NDFD feed does not nest values under the periods they describe. Each
//! `time-layout` lists period boundaries under a layout key, and each parameter
//! (temperature, precipitation probability, weather) names the layout it follows
//! and lists its values in the same order. Forecast records are rebuilt by
//! resolving those keys and matching values to periods by position.

use std::cmp::Reverse;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::ForecastError;
use crate::models::{Forecast, ForecastKey, Geoposition};
use crate::schema::{Element, SchemaTree};

/// Finds a previously stored forecast so a re-parse updates it instead of duplicating it
pub trait ForecastLookup {
    /// Forecast at `position` whose period starts at `date`
    fn forecast_for(
        &self,
        position: &Geoposition,
        date: DateTime<Utc>,
    ) -> Result<Option<Forecast>, ForecastError>;
}

/// Lookup that never finds anything; every parsed record is new
pub struct NoLookup;

impl ForecastLookup for NoLookup {
    fn forecast_for(
        &self,
        _position: &Geoposition,
        _date: DateTime<Utc>,
    ) -> Result<Option<Forecast>, ForecastError> {
        Ok(None)
    }
}

/// Result of parsing one feed response
#[derive(Debug, Clone)]
pub struct ParsedResponse {
    /// Point the feed reports the forecast for
    pub position: Geoposition,
    /// One record per period of the primary time-layout, in layout order
    pub forecasts: Vec<Forecast>,
    /// Non-fatal problems; the affected values were left out
    pub inconsistencies: Vec<ForecastError>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Period {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug)]
struct TimeLayout<'a> {
    key: &'a str,
    periods: Vec<Period>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParameterKind {
    MinimumTemperature,
    MaximumTemperature,
    PrecipitationProbability,
    Weather,
    Other,
}

impl ParameterKind {
    fn of(element: Element<'_>) -> Self {
        match (element.name(), element.attribute_value("type")) {
            ("temperature", Some("minimum")) => ParameterKind::MinimumTemperature,
            ("temperature", Some("maximum")) => ParameterKind::MaximumTemperature,
            ("probability-of-precipitation", _) => ParameterKind::PrecipitationProbability,
            ("weather", _) => ParameterKind::Weather,
            _ => ParameterKind::Other,
        }
    }
}

#[derive(Debug)]
struct Parameter<'a> {
    kind: ParameterKind,
    name: &'a str,
    layout: usize,
    units: Option<&'a str>,
    /// `None` when the value count did not match the layout's period count
    values: Option<Vec<Option<&'a str>>>,
}

/// Values gathered for one period before they are written to a record
#[derive(Debug, Default)]
struct PeriodValues {
    summary: Option<String>,
    probability_of_precipitation: Option<u8>,
    minimum_temperature: Option<f64>,
    maximum_temperature: Option<f64>,
    temperature_units: Option<String>,
}

/// DWML parser and forecast extractor
pub struct ResponseParser;

impl ResponseParser {
    /// Parse a raw feed response into forecast records.
    ///
    /// Fails with `MalformedResponse` when the XML is not well-formed, the point
    /// location is missing, or no usable time-layout exists. Parameters that
    /// reference an unknown layout or do not line up with their layout are
    /// dropped without failing the parse.
    pub fn parse_response(
        response: &[u8],
        lookup: &dyn ForecastLookup,
    ) -> Result<ParsedResponse, ForecastError> {
        let tree = SchemaTree::parse(response)?;
        Self::extract(&tree, lookup)
    }

    /// Run the extraction over an already parsed tree
    pub fn extract(
        tree: &SchemaTree,
        lookup: &dyn ForecastLookup,
    ) -> Result<ParsedResponse, ForecastError> {
        let data = tree
            .root()
            .child_with_name("data")
            .ok_or_else(|| ForecastError::malformed("response has no <data> element"))?;

        let (position, location_key) = Self::locate_point(data)?;
        debug!("Feed is for point {}", position);

        let mut inconsistencies = Vec::new();
        let layouts = Self::read_time_layouts(data, &mut inconsistencies);
        if layouts.is_empty() {
            return Err(ForecastError::malformed(
                "response has no usable <time-layout> element",
            ));
        }

        let parameters = match Self::parameters_block(data, location_key) {
            Some(block) => Self::read_parameters(block, &layouts, &mut inconsistencies),
            None => {
                warn!("Response has no <parameters> block, forecasts will be empty shells");
                Vec::new()
            }
        };

        let primary = Self::primary_layout(&layouts, &parameters);
        debug!(
            "Primary time-layout is '{}' with {} periods",
            layouts[primary].key,
            layouts[primary].periods.len()
        );

        let forecasts = Self::synthesize(
            &position,
            &layouts,
            primary,
            &parameters,
            lookup,
            &mut inconsistencies,
        )?;

        info!(
            "Parsed {} forecasts for {} ({} inconsistencies)",
            forecasts.len(),
            position,
            inconsistencies.len()
        );

        Ok(ParsedResponse {
            position,
            forecasts,
            inconsistencies,
        })
    }

    fn locate_point(data: Element<'_>) -> Result<(Geoposition, Option<&str>), ForecastError> {
        let location = data
            .child_with_name("location")
            .ok_or_else(|| ForecastError::malformed("response has no <location> element"))?;
        let point = location
            .child_with_name("point")
            .ok_or_else(|| ForecastError::malformed("location has no <point> element"))?;

        let coordinate = |name: &str| -> Result<f64, ForecastError> {
            let raw = point
                .attribute_value(name)
                .ok_or_else(|| ForecastError::malformed(format!("point has no {name}")))?;
            raw.trim()
                .parse::<f64>()
                .map_err(|e| ForecastError::malformed(format!("invalid point {name} '{raw}': {e}")))
        };

        let position = Geoposition::new(coordinate("latitude")?, coordinate("longitude")?);
        position
            .validate()
            .map_err(|e| ForecastError::malformed(format!("point out of range: {e}")))?;

        let key = location
            .child_with_name("location-key")
            .map(Element::value)
            .filter(|key| !key.is_empty());
        Ok((position, key))
    }

    fn parameters_block<'a>(
        data: Element<'a>,
        location_key: Option<&str>,
    ) -> Option<Element<'a>> {
        location_key
            .and_then(|key| data.child_with_attribute("parameters", "applicable-location", key))
            .or_else(|| data.child_with_name("parameters"))
    }

    fn read_time_layouts<'a>(
        data: Element<'a>,
        inconsistencies: &mut Vec<ForecastError>,
    ) -> Vec<TimeLayout<'a>> {
        let mut layouts = Vec::new();

        for layout in data.children_named("time-layout") {
            let key = layout
                .child_with_name("layout-key")
                .map(Element::value)
                .filter(|key| !key.is_empty())
                .or_else(|| layout.attribute_value("layout-key"));
            let Some(key) = key else {
                Self::record(inconsistencies, "time-layout without a layout-key".to_string());
                continue;
            };

            match Self::read_periods(layout) {
                Ok(periods) if periods.is_empty() => {
                    Self::record(inconsistencies, format!("time-layout '{key}' has no periods"));
                }
                Ok(periods) => {
                    debug!("time-layout '{}' has {} periods", key, periods.len());
                    layouts.push(TimeLayout { key, periods });
                }
                Err(message) => {
                    Self::record(inconsistencies, format!("time-layout '{key}': {message}"));
                }
            }
        }

        layouts
    }

    /// Pair start/end times in document order; a missing end is the next period's start
    fn read_periods(layout: Element<'_>) -> Result<Vec<Period>, String> {
        let mut bounds: Vec<(DateTime<Utc>, Option<DateTime<Utc>>)> = Vec::new();

        for child in layout.children() {
            match child.name() {
                "start-valid-time" => bounds.push((parse_timestamp(child.value())?, None)),
                "end-valid-time" => {
                    let end = parse_timestamp(child.value())?;
                    match bounds.last_mut() {
                        Some((_, slot)) if slot.is_none() => *slot = Some(end),
                        _ => return Err("end-valid-time without a matching start".to_string()),
                    }
                }
                _ => {}
            }
        }

        let periods = bounds
            .iter()
            .enumerate()
            .map(|(index, &(start, end))| {
                let end = end
                    .or_else(|| bounds.get(index + 1).map(|&(next, _)| next))
                    .unwrap_or(start);
                Period { start, end }
            })
            .collect();
        Ok(periods)
    }

    fn read_parameters<'a>(
        block: Element<'a>,
        layouts: &[TimeLayout<'_>],
        inconsistencies: &mut Vec<ForecastError>,
    ) -> Vec<Parameter<'a>> {
        let mut parameters = Vec::new();

        for element in block.children() {
            let Some(layout_key) = element.attribute_value("time-layout") else {
                continue;
            };
            let name = element.name();
            let Some(layout) = layouts.iter().position(|layout| layout.key == layout_key) else {
                warn!(
                    "Skipping parameter '{}': time-layout '{}' not found",
                    name, layout_key
                );
                continue;
            };

            let kind = ParameterKind::of(element);
            if kind == ParameterKind::Other {
                debug!("Ignoring parameter '{}'", name);
                parameters.push(Parameter {
                    kind,
                    name,
                    layout,
                    units: None,
                    values: None,
                });
                continue;
            }

            let values: Vec<Option<&str>> = if kind == ParameterKind::Weather {
                element
                    .children_named("weather-conditions")
                    .map(|conditions| {
                        conditions
                            .attribute_value("weather-summary")
                            .map(str::trim)
                            .filter(|summary| !summary.is_empty())
                    })
                    .collect()
            } else {
                element
                    .children_named("value")
                    .map(|value| {
                        let nil = value.attribute_value("xsi:nil") == Some("true");
                        (!nil && !value.value().is_empty()).then(|| value.value())
                    })
                    .collect()
            };

            let period_count = layouts[layout].periods.len();
            let values = if values.len() == period_count {
                Some(values)
            } else {
                Self::record(
                    inconsistencies,
                    format!(
                        "parameter '{}' has {} values for {} periods of time-layout '{}'",
                        name,
                        values.len(),
                        period_count,
                        layout_key
                    ),
                );
                None
            };

            parameters.push(Parameter {
                kind,
                name,
                layout,
                units: element.attribute_value("units"),
                values,
            });
        }

        parameters
    }

    /// Layout referenced by the most parameters; the earliest one wins a tie
    fn primary_layout(layouts: &[TimeLayout<'_>], parameters: &[Parameter<'_>]) -> usize {
        let mut counts = vec![0usize; layouts.len()];
        for parameter in parameters {
            counts[parameter.layout] += 1;
        }
        (0..layouts.len())
            .max_by_key(|&index| (counts[index], Reverse(index)))
            .unwrap_or(0)
    }

    /// Index into `layout`'s values that corresponds to `period` of `primary`.
    /// A primary period with no width (a last period without an end) is open-ended.
    fn aligned_index(
        layout: &TimeLayout<'_>,
        primary: &TimeLayout<'_>,
        period: usize,
    ) -> Option<usize> {
        if layout.periods.len() == primary.periods.len() {
            return Some(period);
        }
        let target = primary.periods.get(period)?;
        let window_end = (target.end > target.start).then_some(target.end);
        layout.periods.iter().position(|candidate| {
            candidate.start >= target.start && window_end.is_none_or(|end| candidate.start < end)
        })
    }

    fn synthesize(
        position: &Geoposition,
        layouts: &[TimeLayout<'_>],
        primary: usize,
        parameters: &[Parameter<'_>],
        lookup: &dyn ForecastLookup,
        inconsistencies: &mut Vec<ForecastError>,
    ) -> Result<Vec<Forecast>, ForecastError> {
        let primary_layout = &layouts[primary];
        let fetch_date = Utc::now();
        let mut forecasts: Vec<Forecast> = Vec::with_capacity(primary_layout.periods.len());
        let mut seen: HashMap<ForecastKey, usize> = HashMap::new();

        for (index, period) in primary_layout.periods.iter().enumerate() {
            let key = ForecastKey::new(position, period.start);
            if seen.contains_key(&key) {
                Self::record(
                    inconsistencies,
                    format!(
                        "time-layout '{}' repeats period starting {}",
                        primary_layout.key, period.start
                    ),
                );
                continue;
            }

            let mut values = PeriodValues::default();
            for parameter in parameters {
                let Some(parameter_values) = &parameter.values else {
                    continue;
                };
                let aligned = if parameter.layout == primary {
                    Some(index)
                } else {
                    Self::aligned_index(&layouts[parameter.layout], primary_layout, index)
                };
                let Some(raw) = aligned.and_then(|i| parameter_values.get(i).copied().flatten())
                else {
                    continue;
                };
                Self::apply_value(parameter, raw, &mut values, inconsistencies);
            }

            let mut forecast = match lookup.forecast_for(position, period.start)? {
                Some(existing) => {
                    debug!("Updating stored forecast starting {}", period.start);
                    existing
                }
                None => Forecast::new(position, period.start, period.end),
            };
            let rounded = position.rounded();
            forecast.latitude = rounded.latitude;
            forecast.longitude = rounded.longitude;
            forecast.end_date = period.end;
            forecast.fetch_date = fetch_date;
            forecast.summary = values.summary;
            forecast.probability_of_precipitation = values.probability_of_precipitation;
            forecast.minimum_temperature = values.minimum_temperature;
            forecast.maximum_temperature = values.maximum_temperature;
            forecast.temperature_units = values.temperature_units;

            seen.insert(key, forecasts.len());
            forecasts.push(forecast);
        }

        Ok(forecasts)
    }

    fn apply_value(
        parameter: &Parameter<'_>,
        raw: &str,
        values: &mut PeriodValues,
        inconsistencies: &mut Vec<ForecastError>,
    ) {
        match parameter.kind {
            ParameterKind::MinimumTemperature | ParameterKind::MaximumTemperature => {
                let slot = if parameter.kind == ParameterKind::MinimumTemperature {
                    &mut values.minimum_temperature
                } else {
                    &mut values.maximum_temperature
                };
                if slot.is_some() {
                    return;
                }
                match raw.trim().parse::<f64>() {
                    Ok(temperature) => {
                        *slot = Some(temperature);
                        if values.temperature_units.is_none() {
                            values.temperature_units = parameter.units.map(str::to_string);
                        }
                    }
                    Err(_) => Self::record(
                        inconsistencies,
                        format!("parameter '{}' has non-numeric value '{raw}'", parameter.name),
                    ),
                }
            }
            ParameterKind::PrecipitationProbability => {
                if values.probability_of_precipitation.is_some() {
                    return;
                }
                match raw.trim().parse::<f64>() {
                    Ok(percent) if (0.0..=100.0).contains(&percent) => {
                        values.probability_of_precipitation = Some(percent.round() as u8);
                    }
                    _ => Self::record(
                        inconsistencies,
                        format!("parameter '{}' has invalid percentage '{raw}'", parameter.name),
                    ),
                }
            }
            ParameterKind::Weather => {
                if values.summary.is_none() {
                    values.summary = Some(raw.to_string());
                }
            }
            ParameterKind::Other => {}
        }
    }

    fn record(inconsistencies: &mut Vec<ForecastError>, message: String) {
        warn!("Feed inconsistency: {}", message);
        inconsistencies.push(ForecastError::inconsistency(message));
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{value}': {e}"))
}
