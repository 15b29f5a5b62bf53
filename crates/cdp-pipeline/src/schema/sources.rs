//! The built-in Chicago open-data sources

use crate::error::PipelineResult;
use crate::schema::{CrossFieldRule, FieldKind as K, FieldSpec, PointLookup, Refresh, SourceSchema};

fn req(key: &str, kind: K) -> FieldSpec {
    FieldSpec::required(key, kind)
}

fn opt(key: &str, kind: K) -> FieldSpec {
    FieldSpec::optional(key, kind)
}

fn all_required(keys: &[&str], kind: K) -> Vec<FieldSpec> {
    keys.iter().map(|k| req(k, kind)).collect()
}

fn all_optional(keys: &[&str], kind: K) -> Vec<FieldSpec> {
    keys.iter().map(|k| opt(k, kind)).collect()
}

/// Every built-in source in registration order
pub fn all() -> PipelineResult<Vec<SourceSchema>> {
    Ok(vec![
        taxi_trips()?,
        covid_cases()?,
        covid_vulnerability_index()?,
        building_permits()?,
        census_data()?,
        transportation_trips()?,
        public_health_statistics()?,
    ])
}

pub fn taxi_trips() -> PipelineResult<SourceSchema> {
    SourceSchema::builder("taxi_trips")
        .dataset("wrvz-psew", Refresh::Recurring)
        .field(req("trip_id", K::String))
        .field(req("trip_start_timestamp", K::Timestamp))
        .field(req("trip_end_timestamp", K::Timestamp))
        .field(req("pickup_centroid_latitude", K::Float))
        .field(req("pickup_centroid_longitude", K::Float))
        .field(req("pickup_community_area", K::String))
        .field(req("dropoff_centroid_latitude", K::Float))
        .field(req("dropoff_centroid_longitude", K::Float))
        .field(req("dropoff_community_area", K::String))
        .lookup(PointLookup::required(
            "pickup_centroid_latitude",
            "pickup_centroid_longitude",
            "pickup_zipcode",
        ))
        .lookup(PointLookup::required(
            "dropoff_centroid_latitude",
            "dropoff_centroid_longitude",
            "dropoff_zipcode",
        ))
        .build()
}

pub fn covid_cases() -> PipelineResult<SourceSchema> {
    SourceSchema::builder("covid_cases")
        .dataset("yhhz-zm2v", Refresh::Recurring)
        .field(req("zip_code", K::String))
        .field(req("week_number", K::String))
        .field(req("week_start", K::Timestamp))
        .field(req("week_end", K::Timestamp))
        .field(req("cases_weekly", K::Int))
        .field(req("cases_cumulative", K::Int))
        .field(req("case_rate_weekly", K::Float))
        .field(req("case_rate_cumulative", K::Float))
        .field(req("tests_weekly", K::Int))
        .field(req("tests_cumulative", K::Int))
        .field(req("test_rate_weekly", K::Float))
        .field(req("test_rate_cumulative", K::Float))
        .field(req("percent_tested_positive_weekly", K::Float))
        .field(req("percent_tested_positive_cumulative", K::Float))
        .field(req("deaths_weekly", K::Int))
        .field(req("deaths_cumulative", K::Int))
        .field(req("death_rate_weekly", K::Float))
        .field(req("death_rate_cumulative", K::Float))
        .field(req("population", K::Int))
        .field(req("row_id", K::String))
        .field(req("latitude", K::Float).coordinate("zip_code_location", 1))
        .field(req("longitude", K::Float).coordinate("zip_code_location", 0))
        .build()
}

pub fn covid_vulnerability_index() -> PipelineResult<SourceSchema> {
    SourceSchema::builder("covid_vulnerability_index")
        .dataset("xhc6-88s9", Refresh::Once)
        .field(req("geography_type", K::String))
        .field(req("community_area_or_zip", K::String))
        .field(opt("community_area_name", K::String))
        .field(req("ccvi_score", K::Float))
        .field(req("ccvi_category", K::String))
        .fields(all_optional(
            &[
                "rank_socioeconomic_status",
                "rank_household_composition",
                "rank_adults_no_pcp",
                "rank_cumulative_mobility_ratio",
                "rank_frontline_essential_workers",
                "rank_age_65_plus",
                "rank_comorbid_conditions",
            ],
            K::Int,
        ))
        .field(req("rank_covid_19_incidence_rate", K::Int))
        .field(opt("rank_covid_19_hospital_admission_rate", K::Int))
        .field(opt("rank_covid_19_crude_mortality_rate", K::Int))
        .field(req("latitude", K::Float).coordinate("location", 1))
        .field(req("longitude", K::Float).coordinate("location", 0))
        .build()
}

pub fn building_permits() -> PipelineResult<SourceSchema> {
    SourceSchema::builder("building_permits")
        .dataset("ydr8-5enu", Refresh::Recurring)
        .field(req("id", K::String))
        .field(req("permit_code", K::String).from_key("permit_"))
        .field(opt("permit_status", K::String))
        .field(opt("permit_milestone", K::String))
        .field(req("permit_type", K::String))
        .field(req("review_type", K::String))
        .field(req("application_start_date", K::Timestamp))
        .field(req("issue_date", K::Timestamp))
        .field(req("processing_time", K::String))
        .field(req("street_number", K::String))
        .field(req("street_direction", K::String))
        .field(req("street_name", K::String))
        .field(opt("work_type", K::String))
        .field(req("work_description", K::String))
        .fields(all_required(
            &[
                "building_fee_paid",
                "zoning_fee_paid",
                "other_fee_paid",
                "subtotal_paid",
                "building_fee_unpaid",
                "zoning_fee_unpaid",
                "other_fee_unpaid",
                "subtotal_unpaid",
                "building_fee_waived",
                "building_fee_subtotal",
                "zoning_fee_subtotal",
                "other_fee_subtotal",
                "zoning_fee_waived",
                "other_fee_waived",
                "subtotal_waived",
                "total_fee",
            ],
            K::Float,
        ))
        .fields(all_optional(
            &[
                "contact_1_type",
                "contact_1_name",
                "contact_1_city",
                "contact_1_state",
                "contact_1_zipcode",
            ],
            K::String,
        ))
        .field(req("reported_cost", K::String))
        .fields(all_optional(
            &["community_area", "census_tract", "ward", "xcoordinate", "ycoordinate"],
            K::String,
        ))
        .field(opt("latitude", K::Float))
        .field(opt("longitude", K::Float))
        .rule(CrossFieldRule::all_empty(
            "location",
            &[
                "community_area",
                "census_tract",
                "ward",
                "xcoordinate",
                "ycoordinate",
                "latitude",
                "longitude",
            ],
        ))
        .lookup(PointLookup::required("latitude", "longitude", "zipcode"))
        .project(&[
            "id",
            "permit_status",
            "permit_type",
            "review_type",
            "application_start_date",
            "issue_date",
            "work_type",
            "total_fee",
            "reported_cost",
            "community_area",
            "latitude",
            "longitude",
        ])
        .build()
}

pub fn census_data() -> PipelineResult<SourceSchema> {
    SourceSchema::builder("census_data")
        .dataset("kn9c-c2s2", Refresh::Once)
        .field(req("community_area_number", K::String).from_key("ca"))
        .field(req("community_area_name", K::String))
        .fields(all_required(
            &[
                "percent_of_housing_crowded",
                "percent_households_below_poverty",
                "percent_aged_16_unemployed",
                "percent_aged_25_without_high_school_diploma",
                "percent_aged_under_18_or_over_64",
            ],
            K::Float,
        ))
        .field(req("per_capita_income", K::Int).from_key("per_capita_income_"))
        .field(req("hardship_index", K::Int))
        .build()
}

pub fn transportation_trips() -> PipelineResult<SourceSchema> {
    SourceSchema::builder("transportation_trips")
        .dataset("m6dm-c72p", Refresh::Recurring)
        .field(req("trip_id", K::String))
        .field(req("trip_start_timestamp", K::Timestamp))
        .field(req("trip_end_timestamp", K::Timestamp))
        .field(opt("pickup_census_tract", K::String))
        .field(opt("dropoff_census_tract", K::String))
        .field(req("pickup_community_area", K::String))
        .field(req("dropoff_community_area", K::String))
        .field(req("pickup_centroid_latitude", K::Float))
        .field(req("pickup_centroid_longitude", K::Float))
        .field(req("dropoff_centroid_latitude", K::Float))
        .field(req("dropoff_centroid_longitude", K::Float))
        .lookup(PointLookup::required(
            "pickup_centroid_latitude",
            "pickup_centroid_longitude",
            "pickup_zipcode",
        ))
        .lookup(PointLookup::required(
            "dropoff_centroid_latitude",
            "dropoff_centroid_longitude",
            "dropoff_zipcode",
        ))
        .build()
}

pub fn public_health_statistics() -> PipelineResult<SourceSchema> {
    SourceSchema::builder("public_health_statistics")
        .dataset("iqnk-2tcu", Refresh::Once)
        .field(req("community_area", K::String))
        .field(req("community_area_name", K::String))
        .fields(all_optional(
            &[
                "birth_rate",
                "general_fertility_rate",
                "low_birth_weight",
                "prenatal_care_beginning_in_first_trimester",
                "preterm_births",
                "teen_birth_rate",
                "assault_homicide",
                "breast_cancer_in_females",
                "cancer_all_sites",
                "colorectal_cancer",
                "diabetes_related",
                "firearm_related",
                "infant_mortality_rate",
                "lung_cancer",
                "prostate_cancer_in_males",
                "stroke_cerebrovascular_disease",
                "childhood_blood_lead_level_screening",
                "childhood_lead_poisoning",
                "gonorrhea_in_females",
                "gonorrhea_in_males",
                "tuberculosis",
            ],
            K::Float,
        ))
        .field(req("below_poverty_level", K::Float))
        .fields(all_optional(
            &["crowded_housing", "dependency", "no_high_school_diploma"],
            K::Float,
        ))
        .field(req("per_capita_income", K::Float))
        .field(req("unemployment", K::Float))
        .build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_taxi_trips_has_two_required_lookups() {
        let schema = taxi_trips().unwrap();
        assert_eq!(schema.enrichment.lookups.len(), 2);
        assert!(schema.enrichment.lookups.iter().all(|l| l.required));
        assert!(schema.fields.iter().all(|f| f.required));
    }

    #[test]
    fn test_identity_enrichment_sources() {
        for schema in [covid_cases(), covid_vulnerability_index(), census_data(), public_health_statistics()] {
            assert!(schema.unwrap().enrichment.is_identity());
        }
    }

    #[test]
    fn test_building_permits_location_rule_and_projection() {
        let schema = building_permits().unwrap();
        assert_eq!(schema.rules.len(), 1);
        let projection = schema.enrichment.projection.as_ref().unwrap();
        assert!(projection.contains(&"total_fee".to_string()));
        assert!(!projection.contains(&"permit_code".to_string()));
    }

    #[test]
    fn test_every_source_has_a_dataset() {
        for schema in all().unwrap() {
            assert!(schema.dataset.is_some(), "{} has no dataset", schema.name);
        }
    }
}
