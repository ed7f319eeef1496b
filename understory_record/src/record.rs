// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Record factories and persistent record values.

use alloc::collections::BTreeMap;
use alloc::rc::{Rc, Weak};
use alloc::string::ToString;
use alloc::vec::Vec;
use core::cell::{OnceCell, RefCell};
use core::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::error::RecordError;
use crate::memo::{Dependency, Memo, MemoKey};
use crate::value::Value;

/// Shared, immutable description of a record type.
struct Schema {
    name: Rc<str>,
    keys: Vec<Rc<str>>,
    defaults: Vec<Value>,
    index: BTreeMap<Rc<str>, usize>,
    memo: Memo,
}

impl Schema {
    fn slot(&self, key: &str) -> Result<usize, RecordError> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| RecordError::UnknownField {
                record: self.name.to_string(),
                key: key.to_string(),
            })
    }
}

/// Create a record factory from `(key, default)` pairs.
///
/// Keys keep their first-seen order; a repeated key replaces the earlier
/// default.
///
/// ```
/// use understory_record::define;
///
/// let point = define([("x", 0), ("y", 0)]);
/// let origin = point.create();
/// let moved = origin.set("x", 3).unwrap();
///
/// assert_eq!(origin.get_int("x"), Some(0));
/// assert_eq!(moved.get_int("x"), Some(3));
/// assert_eq!(moved.get_int("y"), Some(0));
/// ```
pub fn define<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> RecordFactory
where
    K: AsRef<str>,
    V: Into<Value>,
{
    RecordFactory::new("Record", fields)
}

/// Creates records that share one schema and one memoization cache.
///
/// Cloning a factory yields a handle to the same record type.
#[derive(Clone)]
pub struct RecordFactory {
    schema: Rc<Schema>,
}

impl core::fmt::Debug for RecordFactory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RecordFactory")
            .field("name", &self.schema.name)
            .field("keys", &self.schema.keys)
            .field("memo", &self.schema.memo)
            .finish_non_exhaustive()
    }
}

impl PartialEq for RecordFactory {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.schema, &other.schema)
    }
}

impl Eq for RecordFactory {}

impl RecordFactory {
    /// Create a named record factory from `(key, default)` pairs.
    ///
    /// The name only appears in `Debug` output and error messages.
    pub fn new<K, V>(name: &str, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut keys: Vec<Rc<str>> = Vec::new();
        let mut defaults = Vec::new();
        let mut index = BTreeMap::new();
        for (key, value) in fields {
            let key = key.as_ref();
            if let Some(&slot) = index.get(key) {
                defaults[slot] = value.into();
                continue;
            }
            let key: Rc<str> = key.into();
            index.insert(Rc::clone(&key), keys.len());
            keys.push(key);
            defaults.push(value.into());
        }
        Self {
            schema: Rc::new(Schema {
                name: name.into(),
                keys,
                defaults,
                index,
                memo: Memo::new(),
            }),
        }
    }

    /// Name of the record type.
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Field keys in schema order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.schema.keys.iter().map(|k| &**k)
    }

    /// Default value of a field, if the key exists.
    pub fn default_of(&self, key: &str) -> Option<&Value> {
        let slot = *self.schema.index.get(key)?;
        self.schema.defaults.get(slot)
    }

    /// Create a record holding every default.
    pub fn create(&self) -> Record {
        Record::from_parts(Rc::clone(&self.schema), self.schema.defaults.clone())
    }

    /// Create a record from a partial set of fields; the rest keep their defaults.
    ///
    /// # Errors
    ///
    /// [`RecordError::UnknownField`] if a key is not in the schema.
    pub fn create_with<K, V>(
        &self,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Record, RecordError>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut values = self.schema.defaults.clone();
        for (key, value) in fields {
            values[self.schema.slot(key.as_ref())?] = value.into();
        }
        Ok(Record::from_parts(Rc::clone(&self.schema), values))
    }

    /// The memoization cache shared by every record of this type.
    pub fn memo(&self) -> &Memo {
        &self.schema.memo
    }
}

struct RecordInner {
    schema: Rc<Schema>,
    fields: Vec<Value>,
    hash: OnceCell<u64>,
    // Partners already proven structurally equal. Weak keeps their address
    // reserved, so pointer comparison stays sound.
    equal_to: RefCell<Vec<Weak<RecordInner>>>,
}

/// An immutable, structurally shared record.
///
/// Every update returns a new `Record`; the receiver is never modified.
/// Untouched fields (including nested records) are shared by reference with
/// the new value. Cloning a record is a reference-count bump.
///
/// Equality is structural, [`hash_code`](Self::hash_code) is computed once per
/// instance, and [`equals`](Self::equals) remembers partners it has already
/// matched.
#[derive(Clone)]
pub struct Record {
    inner: Rc<RecordInner>,
}

impl Record {
    fn from_parts(schema: Rc<Schema>, fields: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(RecordInner {
                schema,
                fields,
                hash: OnceCell::new(),
                equal_to: RefCell::new(Vec::new()),
            }),
        }
    }

    fn with_field(&self, slot: usize, value: Value) -> Self {
        let mut fields = self.inner.fields.clone();
        fields[slot] = value;
        Self::from_parts(Rc::clone(&self.inner.schema), fields)
    }

    /// The factory this record was created from.
    pub fn factory(&self) -> RecordFactory {
        RecordFactory {
            schema: Rc::clone(&self.inner.schema),
        }
    }

    /// Whether this record was created by `factory`.
    pub fn is_instance_of(&self, factory: &RecordFactory) -> bool {
        Rc::ptr_eq(&self.inner.schema, &factory.schema)
    }

    /// Whether both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.inner.fields.len()
    }

    /// Returns true if the schema has no fields.
    pub fn is_empty(&self) -> bool {
        self.inner.fields.is_empty()
    }

    /// Iterate `(key, value)` pairs in schema order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
        self.inner
            .schema
            .keys
            .iter()
            .map(|k| &**k)
            .zip(self.inner.fields.iter())
    }

    /// Read a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let slot = *self.inner.schema.index.get(key)?;
        self.inner.fields.get(slot)
    }

    /// Read a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Read an integer field.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_int)
    }

    /// Read a boolean field.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Read a nested record field.
    pub fn get_record(&self, key: &str) -> Option<&Self> {
        self.get(key).and_then(Value::as_record)
    }

    /// Read a value by descending through nested records.
    pub fn get_in(&self, path: &[&str]) -> Option<&Value> {
        let (last, init) = path.split_last()?;
        let mut record = self;
        for key in init {
            record = record.get_record(key)?;
        }
        record.get(last)
    }

    /// Return a record with `key` set to `value`.
    ///
    /// Setting a value equal to the current one returns `self` unchanged (the
    /// same instance), so identity-keyed caches keep hitting.
    ///
    /// # Errors
    ///
    /// [`RecordError::UnknownField`] if `key` is not in the schema.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<Self, RecordError> {
        let slot = self.inner.schema.slot(key)?;
        let value = value.into();
        if self.inner.fields[slot] == value {
            return Ok(self.clone());
        }
        Ok(self.with_field(slot, value))
    }

    /// Return a record with `key` replaced by `f(current)`.
    ///
    /// # Errors
    ///
    /// [`RecordError::UnknownField`] if `key` is not in the schema.
    pub fn update(&self, key: &str, f: impl FnOnce(&Value) -> Value) -> Result<Self, RecordError> {
        let slot = self.inner.schema.slot(key)?;
        let value = f(&self.inner.fields[slot]);
        if self.inner.fields[slot] == value {
            return Ok(self.clone());
        }
        Ok(self.with_field(slot, value))
    }

    /// Return a record with several fields replaced at once.
    ///
    /// # Errors
    ///
    /// [`RecordError::UnknownField`] if any key is not in the schema; nothing is applied.
    pub fn merge<K, V>(&self, fields: impl IntoIterator<Item = (K, V)>) -> Result<Self, RecordError>
    where
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut values = self.inner.fields.clone();
        let mut changed = false;
        for (key, value) in fields {
            let slot = self.inner.schema.slot(key.as_ref())?;
            let value = value.into();
            if values[slot] != value {
                values[slot] = value;
                changed = true;
            }
        }
        if !changed {
            return Ok(self.clone());
        }
        Ok(Self::from_parts(Rc::clone(&self.inner.schema), values))
    }

    /// Return a record with `key` reset to its default.
    ///
    /// # Errors
    ///
    /// [`RecordError::UnknownField`] if `key` is not in the schema.
    pub fn delete(&self, key: &str) -> Result<Self, RecordError> {
        let slot = self.inner.schema.slot(key)?;
        let default = self.inner.schema.defaults[slot].clone();
        self.set(key, default)
    }

    /// Return a record with the value at `path` set to `value`.
    ///
    /// Only the records along `path` are rebuilt; every other branch is shared.
    ///
    /// # Errors
    ///
    /// - [`RecordError::EmptyPath`] if `path` is empty.
    /// - [`RecordError::UnknownField`] if a key is not in its record's schema.
    /// - [`RecordError::NotARecord`] if an intermediate field is not a record.
    pub fn set_in(&self, path: &[&str], value: impl Into<Value>) -> Result<Self, RecordError> {
        let value = value.into();
        self.update_in(path, move |_| value)
    }

    /// Return a record with the value at `path` replaced by `f(current)`.
    ///
    /// # Errors
    ///
    /// Same as [`set_in`](Self::set_in).
    pub fn update_in(
        &self,
        path: &[&str],
        f: impl FnOnce(&Value) -> Value,
    ) -> Result<Self, RecordError> {
        let (first, rest) = path.split_first().ok_or(RecordError::EmptyPath)?;
        if rest.is_empty() {
            return self.update(first, f);
        }
        let slot = self.inner.schema.slot(first)?;
        let Value::Record(child) = &self.inner.fields[slot] else {
            return Err(RecordError::NotARecord {
                key: first.to_string(),
            });
        };
        let next = child.update_in(rest, f)?;
        if next.ptr_eq(child) {
            return Ok(self.clone());
        }
        Ok(self.with_field(slot, Value::Record(next)))
    }

    /// Content hash, computed once per instance.
    ///
    /// Records with equal fields report equal hash codes.
    pub fn hash_code(&self) -> u64 {
        *self.inner.hash.get_or_init(|| {
            let mut hasher = FxHasher::default();
            for (key, value) in self.iter() {
                key.hash(&mut hasher);
                value.hash(&mut hasher);
            }
            hasher.finish()
        })
    }

    /// Structural equality.
    ///
    /// Records of different types are never equal. A positive result is
    /// remembered on both sides, so comparing the same pair again is a pointer
    /// scan.
    pub fn equals(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if !Rc::ptr_eq(&self.inner.schema, &other.inner.schema) {
            return false;
        }
        if self.hash_code() != other.hash_code() {
            return false;
        }
        if self.knows_equal(other) {
            return true;
        }
        let equal = self
            .inner
            .fields
            .iter()
            .zip(other.inner.fields.iter())
            .all(|(a, b)| a == b);
        if equal {
            self.remember_equal(other);
            other.remember_equal(self);
        }
        equal
    }

    fn knows_equal(&self, other: &Self) -> bool {
        let target = Rc::as_ptr(&other.inner);
        self.inner
            .equal_to
            .borrow()
            .iter()
            .any(|w| core::ptr::eq(w.as_ptr(), target))
    }

    fn remember_equal(&self, other: &Self) {
        let mut partners = self.inner.equal_to.borrow_mut();
        partners.retain(|w| w.strong_count() > 0);
        partners.push(Rc::downgrade(&other.inner));
    }

    /// Return the memoized value of `name` for `dependencies`, computing it
    /// with `supplier` on a miss.
    ///
    /// The cache is shared by every record of this type and keyed by the
    /// identity of each dependency, in order. Include `self` among the
    /// dependencies when the value depends on this record.
    ///
    /// ```
    /// use understory_record::define;
    ///
    /// let a_type = define([("a", 5)]);
    /// let c_type = define([("c", 7)]);
    /// let a = a_type.create();
    /// let c = c_type.create();
    ///
    /// let sum = |a: &understory_record::Record| {
    ///     c.get_or_calculate("sum", &[a, &c], || {
    ///         c.get_int("c").unwrap() + a.get_int("a").unwrap()
    ///     })
    ///     .unwrap()
    /// };
    /// assert_eq!(sum(&a), 12);
    /// assert_eq!(sum(&a.set("a", 1).unwrap()), 8);
    /// ```
    ///
    /// # Errors
    ///
    /// See [`Memo::get_or_calculate`].
    pub fn get_or_calculate<T, F>(
        &self,
        name: &str,
        dependencies: &[&dyn Dependency],
        supplier: F,
    ) -> Result<T, RecordError>
    where
        T: Clone + 'static,
        F: FnOnce() -> T,
    {
        self.inner
            .schema
            .memo
            .get_or_calculate(name, dependencies, supplier)
    }

    /// Memoize `name` until this record instance is replaced.
    ///
    /// Shorthand for [`get_or_calculate`](Self::get_or_calculate) with `[self]`
    /// as the dependencies.
    ///
    /// # Errors
    ///
    /// [`RecordError::MemoTypeMismatch`] if `name` was cached with another type.
    pub fn get_or_calculate_self<T, F>(&self, name: &str, supplier: F) -> Result<T, RecordError>
    where
        T: Clone + 'static,
        F: FnOnce() -> T,
    {
        self.get_or_calculate(name, &[self], supplier)
    }
}

impl Dependency for Record {
    fn memo_key(&self) -> MemoKey {
        MemoKey::of(&self.inner)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash_code());
    }
}

impl core::fmt::Debug for Record {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut s = f.debug_struct(&self.inner.schema.name);
        for (key, value) in self.iter() {
            s.field(key, value);
        }
        s.finish()
    }
}
