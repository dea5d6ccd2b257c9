//! A configurable mandatory-field [`ValidationHook`].

use std::str::FromStr as _;

use statreg_core::{
  hooks::{FieldErrors, ValidationHook},
  unit::{Unit, UnitCommon},
};
use strum::{Display, EnumString};

/// Descriptive fields that can be declared mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Field {
  ShortName,
  TaxRegId,
  ExternalId,
  RegionId,
  Address,
  Activities,
  PrimaryActivity,
  Employees,
  Turnover,
  Persons,
}

impl Field {
  fn is_present(self, c: &UnitCommon) -> bool {
    fn filled(s: &Option<String>) -> bool { s.as_deref().is_some_and(|v| !v.trim().is_empty()) }
    match self {
      Self::ShortName => filled(&c.short_name),
      Self::TaxRegId => filled(&c.tax_reg_id),
      Self::ExternalId => filled(&c.external_id),
      Self::RegionId => c.region_id.is_some(),
      Self::Address => filled(&c.address),
      Self::Activities => !c.activities.is_empty(),
      Self::PrimaryActivity => filled(&c.primary_activity),
      Self::Employees => c.employees.is_some(),
      Self::Turnover => c.turnover.is_some(),
      Self::Persons => !c.persons.is_empty(),
    }
  }
}

/// Reports every configured field that is missing, plus a blank name or
/// stat id, which are always required.
#[derive(Debug, Clone, Default)]
pub struct MandatoryFields {
  fields: Vec<Field>,
}

impl MandatoryFields {
  pub fn new(fields: impl IntoIterator<Item = Field>) -> Self {
    let mut fields: Vec<Field> = fields.into_iter().collect();
    fields.sort();
    fields.dedup();
    Self { fields }
  }

  /// Parse field names such as `"tax_reg_id"`.
  pub fn from_names<T: AsRef<str>>(names: &[T]) -> Result<Self, strum::ParseError> {
    let fields = names
      .iter()
      .map(|n| Field::from_str(n.as_ref()))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(Self::new(fields))
  }
}

impl ValidationHook for MandatoryFields {
  fn validate(&self, unit: &Unit) -> FieldErrors {
    let c = unit.common();
    let mut errors = FieldErrors::new();
    if c.stat_id.trim().is_empty() {
      errors.add("stat_id", "stat id is required");
    }
    if c.name.trim().is_empty() {
      errors.add("name", "name is required");
    }
    for field in &self.fields {
      if !field.is_present(c) {
        errors.add(field.to_string(), format!("{field} is required"));
      }
    }
    errors
  }
}
