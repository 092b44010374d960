//! Loan application input contract
//!
//! The request body of `POST /predict`: twelve categorical fields checked
//! against their enumerated domains and thirty-five numeric fields, some of
//! them range-constrained. Field names keep the upstream dataset's
//! SCREAMING_SNAKE_CASE spelling on the wire.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// Categorical domains
// ============================================================================

pub const NAME_CONTRACT_TYPE: &[&str] = &["Cash loans", "Revolving loans"];

pub const CODE_GENDER: &[&str] = &["F", "M", "XNA"];

pub const YES_NO: &[&str] = &["N", "Y"];

pub const NAME_TYPE_SUITE: &[&str] = &[
    "Unaccompanied",
    "Family",
    "Spouse, partner",
    "Children",
    "Other_B",
    "Other_A",
    "Group of people",
];

pub const NAME_INCOME_TYPE: &[&str] = &[
    "Working",
    "Commercial associate",
    "Pensioner",
    "State servant",
    "Unemployed",
    "Student",
    "Businessman",
    "Maternity leave",
];

pub const NAME_EDUCATION_TYPE: &[&str] = &[
    "Secondary / secondary special",
    "Higher education",
    "Incomplete higher",
    "Lower secondary",
    "Academic degree",
];

pub const NAME_FAMILY_STATUS: &[&str] = &[
    "Married",
    "Single / not married",
    "Civil marriage",
    "Separated",
    "Widow",
    "Unknown",
];

pub const NAME_HOUSING_TYPE: &[&str] = &[
    "House / apartment",
    "With parents",
    "Municipal apartment",
    "Rented apartment",
    "Office apartment",
    "Co-op apartment",
];

pub const OCCUPATION_TYPE: &[&str] = &[
    "Laborers",
    "Sales staff",
    "Core staff",
    "Managers",
    "Drivers",
    "High skill tech staff",
    "Accountants",
    "Medicine staff",
    "Security staff",
    "Cooking staff",
    "Cleaning staff",
    "Private service staff",
    "Low-skill Laborers",
    "Waiters/barmen staff",
    "Secretaries",
    "Realty agents",
    "HR staff",
    "IT staff",
];

pub const WEEKDAY_APPR_PROCESS_START: &[&str] = &[
    "MONDAY",
    "TUESDAY",
    "WEDNESDAY",
    "THURSDAY",
    "FRIDAY",
    "SATURDAY",
    "SUNDAY",
];

pub const ORGANIZATION_TYPE: &[&str] = &[
    "Business Entity Type 3",
    "XNA",
    "Self-employed",
    "Other",
    "Medicine",
    "Business Entity Type 2",
    "Government",
    "School",
    "Trade: type 7",
    "Kindergarten",
    "Construction",
    "Business Entity Type 1",
    "Transport: type 4",
    "Trade: type 3",
    "Industry: type 9",
    "Industry: type 3",
    "Security",
    "Housing",
    "Industry: type 11",
    "Military",
    "Bank",
    "Agriculture",
    "Police",
    "Transport: type 2",
    "Postal",
    "Security Ministries",
    "Trade: type 2",
    "Restaurant",
    "Services",
    "University",
    "Industry: type 7",
    "Transport: type 3",
    "Industry: type 1",
    "Hotel",
    "Electricity",
    "Industry: type 4",
    "Trade: type 6",
    "Industry: type 5",
    "Insurance",
    "Telecom",
    "Emergency",
    "Industry: type 2",
    "Advertising",
    "Realtor",
    "Culture",
    "Industry: type 12",
    "Trade: type 1",
    "Mobile",
    "Legal Services",
    "Cleaning",
    "Transport: type 1",
    "Industry: type 6",
    "Industry: type 10",
    "Religion",
    "Industry: type 13",
    "Trade: type 4",
    "Trade: type 5",
    "Industry: type 8",
];

// ============================================================================
// Input record
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct LoanApplication {
    pub name_contract_type: String,
    pub code_gender: String,
    pub flag_own_car: String,
    pub flag_own_realty: String,
    #[serde(deserialize_with = "whole_number")]
    pub cnt_children: i64,
    pub amt_income_total: f64,
    pub amt_credit: f64,
    pub amt_annuity: f64,
    pub amt_goods_price: f64,
    pub name_type_suite: String,
    pub name_income_type: String,
    pub name_education_type: String,
    pub name_family_status: String,
    pub name_housing_type: String,
    pub region_population_relative: f64,
    #[serde(deserialize_with = "whole_number")]
    pub days_birth: i64,
    #[serde(deserialize_with = "whole_number")]
    pub days_employed: i64,
    #[serde(deserialize_with = "whole_number")]
    pub days_registration: i64,
    #[serde(deserialize_with = "whole_number")]
    pub days_id_publish: i64,
    #[serde(deserialize_with = "whole_number")]
    pub flag_emp_phone: i64,
    #[serde(deserialize_with = "whole_number")]
    pub flag_work_phone: i64,
    #[serde(deserialize_with = "whole_number")]
    pub flag_phone: i64,
    #[serde(deserialize_with = "whole_number")]
    pub flag_email: i64,
    pub occupation_type: String,
    pub cnt_fam_members: f64,
    #[serde(deserialize_with = "whole_number")]
    pub region_rating_client: i64,
    #[serde(deserialize_with = "whole_number")]
    pub region_rating_client_w_city: i64,
    pub weekday_appr_process_start: String,
    #[serde(deserialize_with = "whole_number")]
    pub hour_appr_process_start: i64,
    #[serde(deserialize_with = "whole_number")]
    pub reg_region_not_live_region: i64,
    #[serde(deserialize_with = "whole_number")]
    pub reg_region_not_work_region: i64,
    #[serde(deserialize_with = "whole_number")]
    pub live_region_not_work_region: i64,
    #[serde(deserialize_with = "whole_number")]
    pub reg_city_not_live_city: i64,
    #[serde(deserialize_with = "whole_number")]
    pub reg_city_not_work_city: i64,
    #[serde(deserialize_with = "whole_number")]
    pub live_city_not_work_city: i64,
    pub organization_type: String,
    pub floorsmax_avg: f64,
    pub livingarea_avg: f64,
    pub years_beginexpluatation_mode: f64,
    pub obs_30_cnt_social_circle: f64,
    pub def_30_cnt_social_circle: f64,
    pub days_last_phone_change: f64,
    pub previous_loans_count: f64,
    pub credit_income_percent: f64,
    pub annuity_income_percent: f64,
    pub credit_term: f64,
    pub days_employed_percent: f64,
}

/// Integer fields also take whole-number floats such as `2.0`.
fn whole_number<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(i64),
        Float(f64),
    }

    match Number::deserialize(deserializer)? {
        Number::Int(n) => Ok(n),
        Number::Float(f) if f.fract() == 0.0 && f.abs() <= (1u64 << 53) as f64 => Ok(f as i64),
        Number::Float(f) => Err(D::Error::custom(format!(
            "Input should be a valid integer, got {f}"
        ))),
    }
}

/// One rejected field, shaped like the `detail` entries API clients already parse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldError {
    pub loc: Vec<String>,
    pub msg: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FieldError {
    fn body(field: &str, msg: impl Into<String>, kind: &str) -> Self {
        let mut loc = vec!["body".to_string()];
        if !field.is_empty() {
            loc.push(field.to_string());
        }
        Self {
            loc,
            msg: msg.into(),
            kind: kind.to_string(),
        }
    }
}

#[derive(Error, Debug)]
#[error("request body failed validation ({} field error(s))", .0.len())]
pub struct SchemaError(pub Vec<FieldError>);

impl SchemaError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self(vec![FieldError::body("", msg, "json_invalid")])
    }
}

impl LoanApplication {
    /// Decode and validate a raw JSON body. The raw value is left untouched so
    /// callers can log the record exactly as received.
    pub fn from_json(raw: &Value) -> Result<Self, SchemaError> {
        let app: LoanApplication = serde_json::from_value(raw.clone())
            .map_err(|e| SchemaError(vec![FieldError::body("", e.to_string(), "type_error")]))?;
        app.validate()?;
        Ok(app)
    }

    /// Check categorical domains and numeric bounds, reporting every violation.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let mut errors = Vec::new();

        for (field, value, domain) in self.categorical_fields() {
            if !domain.contains(&value) {
                errors.push(FieldError::body(
                    field,
                    format!("Input should be one of: {}", domain.join(", ")),
                    "enum",
                ));
            }
        }

        if self.cnt_children < 0 {
            errors.push(FieldError::body(
                "CNT_CHILDREN",
                "Input should be greater than or equal to 0",
                "greater_than_equal",
            ));
        }

        for (field, value) in [
            ("AMT_INCOME_TOTAL", self.amt_income_total),
            ("AMT_CREDIT", self.amt_credit),
            ("AMT_ANNUITY", self.amt_annuity),
            ("AMT_GOODS_PRICE", self.amt_goods_price),
        ] {
            if !(value > 0.0) {
                errors.push(FieldError::body(
                    field,
                    "Input should be greater than 0",
                    "greater_than",
                ));
            }
        }

        for (field, value) in self.binary_flags() {
            if !(0..=1).contains(&value) {
                errors.push(FieldError::body(
                    field,
                    "Input should be 0 or 1",
                    "less_than_equal",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError(errors))
        }
    }

    fn categorical_fields(&self) -> Vec<(&'static str, &str, &'static [&'static str])> {
        vec![
            ("NAME_CONTRACT_TYPE", self.name_contract_type.as_str(), NAME_CONTRACT_TYPE),
            ("CODE_GENDER", self.code_gender.as_str(), CODE_GENDER),
            ("FLAG_OWN_CAR", self.flag_own_car.as_str(), YES_NO),
            ("FLAG_OWN_REALTY", self.flag_own_realty.as_str(), YES_NO),
            ("NAME_TYPE_SUITE", self.name_type_suite.as_str(), NAME_TYPE_SUITE),
            ("NAME_INCOME_TYPE", self.name_income_type.as_str(), NAME_INCOME_TYPE),
            ("NAME_EDUCATION_TYPE", self.name_education_type.as_str(), NAME_EDUCATION_TYPE),
            ("NAME_FAMILY_STATUS", self.name_family_status.as_str(), NAME_FAMILY_STATUS),
            ("NAME_HOUSING_TYPE", self.name_housing_type.as_str(), NAME_HOUSING_TYPE),
            ("OCCUPATION_TYPE", self.occupation_type.as_str(), OCCUPATION_TYPE),
            (
                "WEEKDAY_APPR_PROCESS_START",
                self.weekday_appr_process_start.as_str(),
                WEEKDAY_APPR_PROCESS_START,
            ),
            ("ORGANIZATION_TYPE", self.organization_type.as_str(), ORGANIZATION_TYPE),
        ]
    }

    fn binary_flags(&self) -> [(&'static str, i64); 10] {
        [
            ("FLAG_EMP_PHONE", self.flag_emp_phone),
            ("FLAG_WORK_PHONE", self.flag_work_phone),
            ("FLAG_PHONE", self.flag_phone),
            ("FLAG_EMAIL", self.flag_email),
            ("REG_REGION_NOT_LIVE_REGION", self.reg_region_not_live_region),
            ("REG_REGION_NOT_WORK_REGION", self.reg_region_not_work_region),
            ("LIVE_REGION_NOT_WORK_REGION", self.live_region_not_work_region),
            ("REG_CITY_NOT_LIVE_CITY", self.reg_city_not_live_city),
            ("REG_CITY_NOT_WORK_CITY", self.reg_city_not_work_city),
            ("LIVE_CITY_NOT_WORK_CITY", self.live_city_not_work_city),
        ]
    }

    fn numeric_fields(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("CNT_CHILDREN", self.cnt_children as f64),
            ("AMT_INCOME_TOTAL", self.amt_income_total),
            ("AMT_CREDIT", self.amt_credit),
            ("AMT_ANNUITY", self.amt_annuity),
            ("AMT_GOODS_PRICE", self.amt_goods_price),
            ("REGION_POPULATION_RELATIVE", self.region_population_relative),
            ("DAYS_BIRTH", self.days_birth as f64),
            ("DAYS_EMPLOYED", self.days_employed as f64),
            ("DAYS_REGISTRATION", self.days_registration as f64),
            ("DAYS_ID_PUBLISH", self.days_id_publish as f64),
            ("FLAG_EMP_PHONE", self.flag_emp_phone as f64),
            ("FLAG_WORK_PHONE", self.flag_work_phone as f64),
            ("FLAG_PHONE", self.flag_phone as f64),
            ("FLAG_EMAIL", self.flag_email as f64),
            ("CNT_FAM_MEMBERS", self.cnt_fam_members),
            ("REGION_RATING_CLIENT", self.region_rating_client as f64),
            ("REGION_RATING_CLIENT_W_CITY", self.region_rating_client_w_city as f64),
            ("HOUR_APPR_PROCESS_START", self.hour_appr_process_start as f64),
            ("REG_REGION_NOT_LIVE_REGION", self.reg_region_not_live_region as f64),
            ("REG_REGION_NOT_WORK_REGION", self.reg_region_not_work_region as f64),
            ("LIVE_REGION_NOT_WORK_REGION", self.live_region_not_work_region as f64),
            ("REG_CITY_NOT_LIVE_CITY", self.reg_city_not_live_city as f64),
            ("REG_CITY_NOT_WORK_CITY", self.reg_city_not_work_city as f64),
            ("LIVE_CITY_NOT_WORK_CITY", self.live_city_not_work_city as f64),
            ("FLOORSMAX_AVG", self.floorsmax_avg),
            ("LIVINGAREA_AVG", self.livingarea_avg),
            ("YEARS_BEGINEXPLUATATION_MODE", self.years_beginexpluatation_mode),
            ("OBS_30_CNT_SOCIAL_CIRCLE", self.obs_30_cnt_social_circle),
            ("DEF_30_CNT_SOCIAL_CIRCLE", self.def_30_cnt_social_circle),
            ("DAYS_LAST_PHONE_CHANGE", self.days_last_phone_change),
            ("PREVIOUS_LOANS_COUNT", self.previous_loans_count),
            ("CREDIT_INCOME_PERCENT", self.credit_income_percent),
            ("ANNUITY_INCOME_PERCENT", self.annuity_income_percent),
            ("CREDIT_TERM", self.credit_term),
            ("DAYS_EMPLOYED_PERCENT", self.days_employed_percent),
        ]
    }

    /// Ordered model columns: numeric fields first, then every categorical
    /// field one-hot encoded over its full domain as `FIELD=value`.
    pub fn to_feature_row(&self) -> FeatureRow {
        let mut columns: Vec<(String, f64)> = self
            .numeric_fields()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect();

        for (field, value, domain) in self.categorical_fields() {
            for candidate in domain {
                let hot = if *candidate == value { 1.0 } else { 0.0 };
                columns.push((format!("{field}={candidate}"), hot));
            }
        }

        FeatureRow { columns }
    }
}

// ============================================================================
// Feature row
// ============================================================================

/// The row handed to a `RiskModel`: named columns in a stable order.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    columns: Vec<(String, f64)>,
}

impl FeatureRow {
    pub fn columns(&self) -> impl Iterator<Item = (&str, f64)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| *value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Dense `f32` vector in column order, for tensor-based backends.
    pub fn to_dense(&self) -> Vec<f32> {
        self.columns.iter().map(|(_, value)| *value as f32).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_application_json() -> Value {
        json!({
            "NAME_CONTRACT_TYPE": "Cash loans",
            "CODE_GENDER": "M",
            "FLAG_OWN_CAR": "Y",
            "FLAG_OWN_REALTY": "Y",
            "CNT_CHILDREN": 0,
            "AMT_INCOME_TOTAL": 100000.0,
            "AMT_CREDIT": 50000.0,
            "AMT_ANNUITY": 2000.0,
            "AMT_GOODS_PRICE": 45000.0,
            "NAME_TYPE_SUITE": "Unaccompanied",
            "NAME_INCOME_TYPE": "Working",
            "NAME_EDUCATION_TYPE": "Higher education",
            "NAME_FAMILY_STATUS": "Married",
            "NAME_HOUSING_TYPE": "House / apartment",
            "REGION_POPULATION_RELATIVE": 0.01,
            "DAYS_BIRTH": -10000,
            "DAYS_EMPLOYED": -2000,
            "DAYS_REGISTRATION": -1500,
            "DAYS_ID_PUBLISH": -500,
            "FLAG_EMP_PHONE": 1,
            "FLAG_WORK_PHONE": 1,
            "FLAG_PHONE": 1,
            "FLAG_EMAIL": 0,
            "OCCUPATION_TYPE": "Managers",
            "CNT_FAM_MEMBERS": 2.0,
            "REGION_RATING_CLIENT": 2,
            "REGION_RATING_CLIENT_W_CITY": 2,
            "WEEKDAY_APPR_PROCESS_START": "MONDAY",
            "HOUR_APPR_PROCESS_START": 10,
            "REG_REGION_NOT_LIVE_REGION": 0,
            "REG_REGION_NOT_WORK_REGION": 0,
            "LIVE_REGION_NOT_WORK_REGION": 0,
            "REG_CITY_NOT_LIVE_CITY": 0,
            "REG_CITY_NOT_WORK_CITY": 0,
            "LIVE_CITY_NOT_WORK_CITY": 0,
            "ORGANIZATION_TYPE": "Business Entity Type 3",
            "FLOORSMAX_AVG": 5.0,
            "LIVINGAREA_AVG": 50.0,
            "YEARS_BEGINEXPLUATATION_MODE": 15.0,
            "OBS_30_CNT_SOCIAL_CIRCLE": 2.0,
            "DEF_30_CNT_SOCIAL_CIRCLE": 0.0,
            "DAYS_LAST_PHONE_CHANGE": -300.0,
            "PREVIOUS_LOANS_COUNT": 1.0,
            "CREDIT_INCOME_PERCENT": 0.5,
            "ANNUITY_INCOME_PERCENT": 0.02,
            "CREDIT_TERM": 20.0,
            "DAYS_EMPLOYED_PERCENT": 0.2
        })
    }

    pub(crate) fn sample_application() -> LoanApplication {
        LoanApplication::from_json(&sample_application_json()).unwrap()
    }

    #[test]
    fn test_valid_application_decodes() {
        let app = sample_application();
        assert_eq!(app.code_gender, "M");
        assert_eq!(app.amt_income_total, 100000.0);
    }

    #[test]
    fn test_invalid_values_reported_together() {
        let mut raw = sample_application_json();
        raw["CNT_CHILDREN"] = json!(-1);
        raw["FLAG_EMP_PHONE"] = json!(2);
        raw["CODE_GENDER"] = json!("Z");
        raw["AMT_CREDIT"] = json!(0.0);

        let err = LoanApplication::from_json(&raw).unwrap_err();
        let fields: Vec<&str> = err.0.iter().map(|e| e.loc[1].as_str()).collect();
        assert_eq!(err.0.len(), 4, "got: {fields:?}");
        assert!(fields.contains(&"CNT_CHILDREN"));
        assert!(fields.contains(&"FLAG_EMP_PHONE"));
        assert!(fields.contains(&"CODE_GENDER"));
        assert!(fields.contains(&"AMT_CREDIT"));
    }

    #[test]
    fn test_wrong_type_is_a_schema_error() {
        let mut raw = sample_application_json();
        raw["NAME_TYPE_SUITE"] = json!(5);
        let err = LoanApplication::from_json(&raw).unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert_eq!(err.0[0].kind, "type_error");
        assert_eq!(err.0[0].loc, vec!["body".to_string()]);
    }

    #[test]
    fn test_whole_number_floats_accepted_for_integer_fields() {
        let mut raw = sample_application_json();
        raw["CNT_CHILDREN"] = json!(2.0);
        raw["DAYS_BIRTH"] = json!(-10000.0);
        raw["FLAG_EMAIL"] = json!(1.0);
        let app = LoanApplication::from_json(&raw).unwrap();
        assert_eq!(app.cnt_children, 2);
        assert_eq!(app.days_birth, -10000);
        assert_eq!(app.flag_email, 1);
    }

    #[test]
    fn test_fractional_value_rejected_for_integer_field() {
        let mut raw = sample_application_json();
        raw["CNT_CHILDREN"] = json!(1.5);
        let err = LoanApplication::from_json(&raw).unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert_eq!(err.0[0].kind, "type_error");
    }

    #[test]
    fn test_missing_field_is_a_schema_error() {
        let mut raw = sample_application_json();
        raw.as_object_mut().unwrap().remove("AMT_ANNUITY");
        let err = LoanApplication::from_json(&raw).unwrap_err();
        assert!(err.0[0].msg.contains("AMT_ANNUITY"), "msg: {}", err.0[0].msg);
    }

    #[test]
    fn test_domains_match_known_values() {
        assert!(NAME_CONTRACT_TYPE.contains(&"Revolving loans"));
        assert!(CODE_GENDER.contains(&"XNA"));
        assert_eq!(ORGANIZATION_TYPE.len(), 58);
        assert_eq!(OCCUPATION_TYPE.len(), 18);
    }

    #[test]
    fn test_feature_row_layout() {
        let row = sample_application().to_feature_row();
        let one_hot: usize = [
            NAME_CONTRACT_TYPE,
            CODE_GENDER,
            YES_NO,
            YES_NO,
            NAME_TYPE_SUITE,
            NAME_INCOME_TYPE,
            NAME_EDUCATION_TYPE,
            NAME_FAMILY_STATUS,
            NAME_HOUSING_TYPE,
            OCCUPATION_TYPE,
            WEEKDAY_APPR_PROCESS_START,
            ORGANIZATION_TYPE,
        ]
        .iter()
        .map(|d| d.len())
        .sum();
        assert_eq!(row.len(), 35 + one_hot);

        assert_eq!(row.columns().next(), Some(("CNT_CHILDREN", 0.0)));
        assert_eq!(row.get("CODE_GENDER=M"), Some(1.0));
        assert_eq!(row.get("CODE_GENDER=F"), Some(0.0));
        assert_eq!(row.get("ORGANIZATION_TYPE=Business Entity Type 3"), Some(1.0));
        assert_eq!(row.get("DAYS_BIRTH"), Some(-10000.0));
        assert_eq!(row.to_dense().len(), row.len());
    }
}
