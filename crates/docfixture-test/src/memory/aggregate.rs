//! Aggregation stages understood by the memory server
//!
//! Covers the subset of the MongoDB pipeline language that fixture tests
//! tend to use: `$match`, `$lookup`, `$project`, `$sort`, `$skip`, `$limit`,
//! `$unwind` and `$count`. Anything else is rejected the way the server
//! rejects an unknown stage.

use bson::{Bson, Document};
use std::cmp::Ordering;
use std::collections::HashMap;

use docfixture_db::error::BackendError;
use docfixture_db::store::StoreResult;

fn invalid(message: impl Into<String>) -> BackendError {
	BackendError::invalid_argument(message)
}

/// Run `pipeline` over `collection`, with `collections` available to `$lookup`.
pub(super) fn run(
	collections: &HashMap<String, Vec<Document>>,
	collection: &str,
	pipeline: &[Document],
) -> StoreResult<Vec<Document>> {
	let mut documents = collections.get(collection).cloned().unwrap_or_default();

	for stage in pipeline {
		let (name, arg) = stage_parts(stage)?;
		documents = match name {
			"$match" => match_stage(documents, as_document(name, arg)?)?,
			"$lookup" => lookup_stage(collections, documents, as_document(name, arg)?)?,
			"$project" => project_stage(documents, as_document(name, arg)?)?,
			"$sort" => sort_stage(documents, as_document(name, arg)?)?,
			"$skip" => {
				let skip = as_count(name, arg)?;
				documents.into_iter().skip(skip).collect()
			}
			"$limit" => {
				let limit = as_count(name, arg)?;
				if limit == 0 {
					return Err(invalid("the limit must be positive"));
				}
				documents.into_iter().take(limit).collect()
			}
			"$unwind" => unwind_stage(documents, arg)?,
			"$count" => count_stage(documents, arg)?,
			other => {
				return Err(invalid(format!(
					"Unrecognized pipeline stage name: '{}'",
					other
				)));
			}
		};
	}

	Ok(documents)
}

fn stage_parts(stage: &Document) -> StoreResult<(&str, &Bson)> {
	let mut entries = stage.iter();
	match (entries.next(), entries.next()) {
		(Some((name, arg)), None) if name.starts_with('$') => Ok((name.as_str(), arg)),
		_ => Err(invalid(
			"A pipeline stage specification object must contain exactly one field.",
		)),
	}
}

fn as_document<'a>(stage: &str, arg: &'a Bson) -> StoreResult<&'a Document> {
	match arg {
		Bson::Document(document) => Ok(document),
		_ => Err(invalid(format!("{} specification must be an object", stage))),
	}
}

fn as_count(stage: &str, arg: &Bson) -> StoreResult<usize> {
	let value = match arg {
		Bson::Int32(n) => i64::from(*n),
		Bson::Int64(n) => *n,
		Bson::Double(f) if f.fract() == 0.0 => *f as i64,
		_ => return Err(invalid(format!("{} requires an integer argument", stage))),
	};
	usize::try_from(value).map_err(|_| invalid(format!("{} must be non-negative", stage)))
}

// ============================================================================
// Paths
// ============================================================================

/// Every value reached by a dotted path, descending through arrays of documents
fn path_values<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
	let segments: Vec<&str> = path.split('.').collect();
	let mut found = Vec::new();
	if let Some(value) = document.get(segments[0]) {
		resolve(value, &segments[1..], &mut found);
	}
	found
}

fn resolve<'a>(value: &'a Bson, rest: &[&str], found: &mut Vec<&'a Bson>) {
	let Some((head, tail)) = rest.split_first() else {
		found.push(value);
		return;
	};

	match value {
		Bson::Document(document) => {
			if let Some(next) = document.get(*head) {
				resolve(next, tail, found);
			}
		}
		Bson::Array(items) => {
			for item in items {
				if let Bson::Document(document) = item
					&& let Some(next) = document.get(*head)
				{
					resolve(next, tail, found);
				}
			}
		}
		_ => {}
	}
}

/// The single value at a dotted path, without descending into arrays
fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
	let mut segments = path.split('.');
	let mut current = document.get(segments.next()?)?;
	for segment in segments {
		current = match current {
			Bson::Document(child) => child.get(segment)?,
			_ => return None,
		};
	}
	Some(current)
}

fn set_path(document: &mut Document, path: &str, value: Bson) {
	match path.split_once('.') {
		None => {
			document.insert(path, value);
		}
		Some((head, rest)) => {
			if !matches!(document.get(head), Some(Bson::Document(_))) {
				document.insert(head, Document::new());
			}
			if let Some(Bson::Document(child)) = document.get_mut(head) {
				set_path(child, rest, value);
			}
		}
	}
}

fn remove_path(document: &mut Document, path: &str) {
	match path.split_once('.') {
		None => {
			document.remove(path);
		}
		Some((head, rest)) => {
			if let Some(Bson::Document(child)) = document.get_mut(head) {
				remove_path(child, rest);
			}
		}
	}
}

// ============================================================================
// Comparison
// ============================================================================

/// Canonical type order used by the server when comparing across types
fn type_rank(value: &Bson) -> u8 {
	match value {
		Bson::MinKey => 0,
		Bson::Null | Bson::Undefined => 1,
		Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
		Bson::String(_) | Bson::Symbol(_) => 3,
		Bson::Document(_) => 4,
		Bson::Array(_) => 5,
		Bson::Binary(_) => 6,
		Bson::ObjectId(_) => 7,
		Bson::Boolean(_) => 8,
		Bson::DateTime(_) => 9,
		Bson::Timestamp(_) => 10,
		Bson::RegularExpression(_) => 11,
		Bson::MaxKey => 13,
		_ => 12,
	}
}

fn as_f64(value: &Bson) -> Option<f64> {
	match value {
		Bson::Int32(n) => Some(f64::from(*n)),
		Bson::Int64(n) => Some(*n as f64),
		Bson::Double(f) => Some(*f),
		Bson::Decimal128(d) => d.to_string().parse().ok(),
		_ => None,
	}
}

fn compare_sequences<'a>(
	left: impl ExactSizeIterator<Item = &'a Bson>,
	right: impl ExactSizeIterator<Item = &'a Bson>,
) -> Ordering {
	let (left_len, right_len) = (left.len(), right.len());
	for (a, b) in left.zip(right) {
		let ordering = compare_bson(a, b);
		if ordering != Ordering::Equal {
			return ordering;
		}
	}
	left_len.cmp(&right_len)
}

fn compare_documents(left: &Document, right: &Document) -> Ordering {
	for ((left_key, left_value), (right_key, right_value)) in left.iter().zip(right.iter()) {
		let ordering = left_key
			.cmp(right_key)
			.then_with(|| compare_bson(left_value, right_value));
		if ordering != Ordering::Equal {
			return ordering;
		}
	}
	left.len().cmp(&right.len())
}

/// Total order over BSON values: type rank first, then value
pub(crate) fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
	let rank = type_rank(a).cmp(&type_rank(b));
	if rank != Ordering::Equal {
		return rank;
	}

	match (a, b) {
		(Bson::String(x) | Bson::Symbol(x), Bson::String(y) | Bson::Symbol(y)) => x.cmp(y),
		(Bson::Document(x), Bson::Document(y)) => compare_documents(x, y),
		(Bson::Array(x), Bson::Array(y)) => compare_sequences(x.iter(), y.iter()),
		(Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
		(Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
		(Bson::DateTime(x), Bson::DateTime(y)) => x.timestamp_millis().cmp(&y.timestamp_millis()),
		(Bson::Timestamp(x), Bson::Timestamp(y)) => {
			(x.time, x.increment).cmp(&(y.time, y.increment))
		}
		_ => match (as_f64(a), as_f64(b)) {
			(Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
			_ => Ordering::Equal,
		},
	}
}

/// Equality as the server sees it: `1`, `1i64` and `1.0` are equal
pub(crate) fn values_equal(a: &Bson, b: &Bson) -> bool {
	if type_rank(a) != type_rank(b) {
		return false;
	}
	match (as_f64(a), as_f64(b)) {
		(Some(x), Some(y)) => x == y,
		(None, None) if matches!(type_rank(a), 1 | 3 | 4 | 5 | 7 | 8 | 9 | 10) => {
			compare_bson(a, b) == Ordering::Equal
		}
		_ => a == b,
	}
}

fn truthy(value: &Bson) -> bool {
	match value {
		Bson::Boolean(b) => *b,
		Bson::Null | Bson::Undefined => false,
		other => as_f64(other).is_none_or(|n| n != 0.0),
	}
}

// ============================================================================
// $match
// ============================================================================

fn match_stage(documents: Vec<Document>, filter: &Document) -> StoreResult<Vec<Document>> {
	let mut kept = Vec::with_capacity(documents.len());
	for document in documents {
		if matches_filter(&document, filter)? {
			kept.push(document);
		}
	}
	Ok(kept)
}

fn matches_filter(document: &Document, filter: &Document) -> StoreResult<bool> {
	for (key, condition) in filter {
		let matched = match key.as_str() {
			"$and" => {
				let mut all = true;
				for clause in clauses(key, condition)? {
					if !matches_filter(document, clause)? {
						all = false;
						break;
					}
				}
				all
			}
			"$or" => {
				let mut any = false;
				for clause in clauses(key, condition)? {
					if matches_filter(document, clause)? {
						any = true;
						break;
					}
				}
				any
			}
			op if op.starts_with('$') => {
				return Err(invalid(format!("unknown top level operator: {}", op)));
			}
			path => field_matches(document, path, condition)?,
		};

		if !matched {
			return Ok(false);
		}
	}
	Ok(true)
}

fn clauses<'a>(op: &str, condition: &'a Bson) -> StoreResult<Vec<&'a Document>> {
	match condition {
		Bson::Array(items) if !items.is_empty() => items
			.iter()
			.map(|item| match item {
				Bson::Document(clause) => Ok(clause),
				_ => Err(invalid(format!("{} argument's entries must be objects", op))),
			})
			.collect(),
		_ => Err(invalid(format!("{} argument must be a non-empty array", op))),
	}
}

fn operator_document(condition: &Bson) -> Option<&Document> {
	match condition {
		Bson::Document(operators) if operators.keys().next().is_some_and(|k| k.starts_with('$')) => {
			Some(operators)
		}
		_ => None,
	}
}

fn field_matches(document: &Document, path: &str, condition: &Bson) -> StoreResult<bool> {
	let values = path_values(document, path);

	match operator_document(condition) {
		Some(operators) => {
			for (op, operand) in operators {
				if !operator_matches(&values, op, operand)? {
					return Ok(false);
				}
			}
			Ok(true)
		}
		None => Ok(equals_any(&values, condition)),
	}
}

/// A missing field equals `null`; an array field equals any of its elements.
fn equals_any(values: &[&Bson], target: &Bson) -> bool {
	if values.is_empty() {
		return matches!(target, Bson::Null);
	}

	values.iter().any(|value| {
		values_equal(value, target)
			|| matches!(value, Bson::Array(items) if items.iter().any(|item| values_equal(item, target)))
	})
}

fn operator_matches(values: &[&Bson], op: &str, operand: &Bson) -> StoreResult<bool> {
	let matched = match op {
		"$eq" => equals_any(values, operand),
		"$ne" => !equals_any(values, operand),
		"$in" => in_list(values, op, operand)?,
		"$nin" => !in_list(values, op, operand)?,
		"$exists" => truthy(operand) != values.is_empty(),
		"$gt" => compares(values, operand, |o| o == Ordering::Greater),
		"$gte" => compares(values, operand, |o| o != Ordering::Less),
		"$lt" => compares(values, operand, |o| o == Ordering::Less),
		"$lte" => compares(values, operand, |o| o != Ordering::Greater),
		other => return Err(invalid(format!("unknown operator: {}", other))),
	};
	Ok(matched)
}

fn in_list(values: &[&Bson], op: &str, operand: &Bson) -> StoreResult<bool> {
	match operand {
		Bson::Array(candidates) => Ok(candidates
			.iter()
			.any(|candidate| equals_any(values, candidate))),
		_ => Err(invalid(format!("{} needs an array", op))),
	}
}

/// Range operators only compare values of the same type class.
fn compares(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
	values
		.iter()
		.flat_map(|value| match value {
			Bson::Array(items) => items.iter().collect::<Vec<_>>(),
			other => vec![*other],
		})
		.any(|value| type_rank(value) == type_rank(operand) && accept(compare_bson(value, operand)))
}

// ============================================================================
// $lookup
// ============================================================================

fn lookup_keys(document: &Document, path: &str) -> Vec<Bson> {
	let values = path_values(document, path);
	if values.is_empty() {
		return vec![Bson::Null];
	}

	values
		.into_iter()
		.flat_map(|value| match value {
			Bson::Array(items) => items.clone(),
			other => vec![other.clone()],
		})
		.collect()
}

fn lookup_stage(
	collections: &HashMap<String, Vec<Document>>,
	documents: Vec<Document>,
	arg: &Document,
) -> StoreResult<Vec<Document>> {
	let field = |name: &str| {
		arg.get_str(name)
			.map_err(|_| invalid(format!("$lookup requires a string '{}' field", name)))
	};
	let from = field("from")?;
	let local_field = field("localField")?;
	let foreign_field = field("foreignField")?;
	let as_field = field("as")?;

	let empty = Vec::new();
	let foreign = collections.get(from).unwrap_or(&empty);

	Ok(documents
		.into_iter()
		.map(|mut document| {
			let keys = lookup_keys(&document, local_field);
			let joined: Vec<Bson> = foreign
				.iter()
				.filter(|candidate| {
					let candidate_values = path_values(candidate, foreign_field);
					keys.iter().any(|key| equals_any(&candidate_values, key))
				})
				.cloned()
				.map(Bson::Document)
				.collect();

			set_path(&mut document, as_field, Bson::Array(joined));
			document
		})
		.collect())
}

// ============================================================================
// $project
// ============================================================================

fn project_stage(documents: Vec<Document>, arg: &Document) -> StoreResult<Vec<Document>> {
	let mut id_flag = None;
	let mut inclusions: Vec<(&str, Option<&str>)> = Vec::new();
	let mut exclusions: Vec<&str> = Vec::new();

	for (field, value) in arg {
		let flag = match value {
			Bson::Boolean(b) => Some(*b),
			Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => Some(truthy(value)),
			_ => None,
		};

		match (field.as_str(), flag, value) {
			("_id", Some(keep), _) => id_flag = Some(keep),
			(name, Some(true), _) => inclusions.push((name, None)),
			(name, Some(false), _) => exclusions.push(name),
			(name, None, Bson::String(reference)) if reference.starts_with('$') => {
				inclusions.push((name, Some(&reference[1..])));
			}
			(name, _, _) => {
				return Err(invalid(format!("unsupported projection for field '{}'", name)));
			}
		}
	}

	if let (false, Some(excluded)) = (inclusions.is_empty(), exclusions.first()) {
		return Err(invalid(format!(
			"Cannot do exclusion on field {} in inclusion projection",
			excluded
		)));
	}

	// `{ _id: 1 }` alone is an inclusion projection; `{ _id: 0 }` alone excludes.
	let include_id = id_flag.unwrap_or(true);
	let inclusion_mode = !inclusions.is_empty() || (exclusions.is_empty() && id_flag == Some(true));

	Ok(documents
		.into_iter()
		.map(|document| {
			if !inclusion_mode {
				let mut projected = document;
				for path in &exclusions {
					remove_path(&mut projected, path);
				}
				if !include_id {
					projected.remove("_id");
				}
				return projected;
			}

			let mut projected = Document::new();
			if include_id && let Some(id) = document.get("_id") {
				projected.insert("_id", id.clone());
			}
			for &(target, source) in &inclusions {
				if let Some(value) = get_path(&document, source.unwrap_or(target)) {
					set_path(&mut projected, target, value.clone());
				}
			}
			projected
		})
		.collect())
}

// ============================================================================
// $sort, $unwind, $count
// ============================================================================

fn sort_stage(mut documents: Vec<Document>, arg: &Document) -> StoreResult<Vec<Document>> {
	let mut keys = Vec::with_capacity(arg.len());
	for (field, direction) in arg {
		let descending = match as_f64(direction) {
			Some(d) if d == 1.0 => false,
			Some(d) if d == -1.0 => true,
			_ => {
				return Err(invalid(
					"$sort key ordering must be 1 (for ascending) or -1 (for descending)",
				));
			}
		};
		keys.push((field.as_str(), descending));
	}
	if keys.is_empty() {
		return Err(invalid("$sort stage must have at least one sort key"));
	}

	let null = Bson::Null;
	documents.sort_by(|a, b| {
		for &(field, descending) in &keys {
			let left = get_path(a, field).unwrap_or(&null);
			let right = get_path(b, field).unwrap_or(&null);
			let ordering = compare_bson(left, right);
			let ordering = if descending {
				ordering.reverse()
			} else {
				ordering
			};
			if ordering != Ordering::Equal {
				return ordering;
			}
		}
		Ordering::Equal
	});
	Ok(documents)
}

fn unwind_stage(documents: Vec<Document>, arg: &Bson) -> StoreResult<Vec<Document>> {
	let (path, preserve) = match arg {
		Bson::String(path) => (path.as_str(), false),
		Bson::Document(options) => {
			let path = options
				.get_str("path")
				.map_err(|_| invalid("$unwind requires a 'path' field"))?;
			let preserve = options
				.get_bool("preserveNullAndEmptyArrays")
				.unwrap_or(false);
			(path, preserve)
		}
		_ => {
			return Err(invalid(
				"expected either a string or an object as specification for $unwind stage",
			));
		}
	};
	let path = path
		.strip_prefix('$')
		.ok_or_else(|| invalid("path option to $unwind stage should be prefixed with a '$'"))?;

	let mut unwound = Vec::with_capacity(documents.len());
	for mut document in documents {
		match get_path(&document, path).cloned() {
			Some(Bson::Array(items)) if !items.is_empty() => {
				for item in items {
					let mut copy = document.clone();
					set_path(&mut copy, path, item);
					unwound.push(copy);
				}
			}
			Some(Bson::Array(_)) => {
				if preserve {
					remove_path(&mut document, path);
					unwound.push(document);
				}
			}
			Some(Bson::Null) | None => {
				if preserve {
					unwound.push(document);
				}
			}
			Some(_) => unwound.push(document),
		}
	}
	Ok(unwound)
}

/// Counts stay 32-bit until they no longer fit.
fn count_value(count: usize) -> Bson {
	match i32::try_from(count) {
		Ok(n) => Bson::Int32(n),
		Err(_) => Bson::Int64(i64::try_from(count).unwrap_or(i64::MAX)),
	}
}

fn count_stage(documents: Vec<Document>, arg: &Bson) -> StoreResult<Vec<Document>> {
	let field = match arg {
		Bson::String(field) if !field.is_empty() && !field.starts_with('$') && !field.contains('.') => {
			field
		}
		_ => {
			return Err(invalid(
				"the count field must be a non-empty string without '$' or '.'",
			));
		}
	};

	if documents.is_empty() {
		return Ok(Vec::new());
	}

	let mut counted = Document::new();
	counted.insert(field.clone(), count_value(documents.len()));
	Ok(vec![counted])
}
