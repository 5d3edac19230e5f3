//! Usage payload parsing and reset-time formatting.
//!
//! The backend's schema drifts between releases, so everything below the top-level object is
//! read leniently: missing or mistyped fields become `None` (or a zero fraction) instead of
//! failing the whole snapshot.

// std
use std::collections::HashSet;
// crates.io
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
// self
use crate::{_prelude::*, error::ParseError};

/// Immutable view of the user's quota at one instant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuotaSnapshot {
	/// When the payload was parsed.
	#[serde(with = "time::serde::rfc3339")]
	pub timestamp: OffsetDateTime,
	/// Account the quota belongs to.
	pub account_label: Option<String>,
	/// Subscription plan name.
	pub plan_label: Option<String>,
	/// Entries in payload order, unique by `id`.
	pub items: Vec<QuotaItem>,
	/// Item the user pinned, merged in after parsing.
	pub selected_item_id: Option<String>,
}
impl QuotaSnapshot {
	/// Returns a copy with `selected_item_id` replaced.
	pub fn with_selection(&self, selected_item_id: Option<String>) -> Self {
		Self { selected_item_id, ..self.clone() }
	}

	/// Pinned item, if the pin names an item present in this snapshot.
	pub fn selected_item(&self) -> Option<&QuotaItem> {
		let id = self.selected_item_id.as_deref()?;

		self.items.iter().find(|item| item.id == id)
	}
}

/// One named quota.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct QuotaItem {
	/// Stable identifier.
	pub id: String,
	/// Display label; falls back to `id`.
	pub label: String,
	/// Remaining share in `[0, 100]`.
	pub remaining_percent: u8,
	/// `100 - remaining_percent`.
	pub used_percent: u8,
	/// `remaining_percent == 0`.
	pub is_exhausted: bool,
	/// When the quota resets, if the backend reported a readable instant.
	#[serde(with = "time::serde::rfc3339::option")]
	pub reset_at: Option<OffsetDateTime>,
}
impl QuotaItem {
	/// Builds an item from a raw remaining fraction, clamping it into `[0, 1]`.
	pub fn from_fraction(
		id: impl Into<String>,
		label: impl Into<String>,
		remaining_fraction: f64,
		reset_at: Option<OffsetDateTime>,
	) -> Self {
		let remaining_percent = percent_of(remaining_fraction);

		Self {
			id: id.into(),
			label: label.into(),
			remaining_percent,
			used_percent: 100 - remaining_percent,
			is_exhausted: remaining_percent == 0,
			reset_at,
		}
	}
}

/// Parses a usage payload.
///
/// Only a malformed document or a non-object top level is an error; `{}` yields an empty
/// snapshot.
pub fn parse(payload: &[u8], now: OffsetDateTime) -> Result<QuotaSnapshot> {
	let mut deserializer = serde_json::Deserializer::from_slice(payload);
	let value: Value = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| ParseError::Malformed { source })?;
	let Value::Object(root) = value else {
		return Err(ParseError::NotAnObject.into());
	};
	let status = root.get("userStatus").and_then(Value::as_object);
	let account_label = status.and_then(|status| {
		non_empty_str(status.get("email")).or_else(|| non_empty_str(status.get("name")))
	});
	let plan_label = status.and_then(|status| {
		non_empty_str(lookup(status, &["planStatus", "planInfo", "planName"]))
	});
	let mut seen = HashSet::new();
	let items = status
		.and_then(|status| lookup(status, &["cascadeModelConfigData", "clientModelConfigs"]))
		.and_then(Value::as_array)
		.map(|configs| {
			configs
				.iter()
				.filter_map(Value::as_object)
				.filter_map(parse_item)
				.filter(|item| seen.insert(item.id.clone()))
				.collect()
		})
		.unwrap_or_default();

	Ok(QuotaSnapshot { timestamp: now, account_label, plan_label, items, selected_item_id: None })
}

/// Formats the time left until `reset_at`: `now`, `45m`, `1h 30m`, or `2d 3h`.
///
/// Partial minutes round up so a quota never reads as reset early.
pub fn format_reset(reset_at: OffsetDateTime, now: OffsetDateTime) -> String {
	let remaining = reset_at - now;

	if !remaining.is_positive() {
		return "now".into();
	}

	let seconds = remaining.whole_seconds();
	let minutes = (seconds + 59) / 60;
	let (days, hours, minutes) = (minutes / 1_440, minutes % 1_440 / 60, minutes % 60);

	match (days, hours) {
		(0, 0) => format!("{minutes}m"),
		(0, _) if minutes == 0 => format!("{hours}h"),
		(0, _) => format!("{hours}h {minutes}m"),
		(_, 0) => format!("{days}d"),
		_ => format!("{days}d {hours}h"),
	}
}

fn parse_item(config: &Map<String, Value>) -> Option<QuotaItem> {
	let id = non_empty_str(lookup(config, &["modelOrAlias", "model"]))
		.or_else(|| non_empty_str(config.get("label")))?;
	let label = non_empty_str(config.get("label")).unwrap_or_else(|| id.clone());
	let quota = config.get("quotaInfo").and_then(Value::as_object);
	let fraction = quota.and_then(|quota| fraction_of(quota.get("remainingFraction")?));
	let reset_at = quota.and_then(|quota| timestamp_of(quota.get("resetTime")?));

	if fraction.is_none() {
		tracing::debug!(item = %id, "quota entry has no readable remaining fraction");
	}

	Some(QuotaItem::from_fraction(id, label, fraction.unwrap_or(0.), reset_at))
}

fn lookup<'a>(object: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
	let (last, parents) = path.split_last()?;
	let mut current = object;

	for key in parents {
		current = current.get(*key)?.as_object()?;
	}

	current.get(*last)
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
	value.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned)
}

fn fraction_of(value: &Value) -> Option<f64> {
	match value {
		Value::Number(number) => number.as_f64(),
		Value::String(text) => text.trim().parse().ok(),
		_ => None,
	}
	.filter(|fraction: &f64| fraction.is_finite())
}

fn timestamp_of(value: &Value) -> Option<OffsetDateTime> {
	OffsetDateTime::parse(value.as_str()?.trim(), &Rfc3339).ok()
}

fn percent_of(fraction: f64) -> u8 {
	(fraction.clamp(0., 1.) * 100. + 0.5).floor() as u8
}
