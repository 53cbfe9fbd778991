//! Event tables for data publishers: the sound collection catalogue sheet
//! (CSA "eventos") and Darwin Core events. One row per deployment.

use anyhow::{Context, Result};
use chrono::FixedOffset;

use crate::data::model::{Table, Value};
use crate::data::ops::{group_indices, left_join};
use crate::pamdp::{ColumnSpec, Dtype, PamSchema};

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

pub const CSA_EVENTS: PamSchema = PamSchema {
    name: "CSAEvents",
    columns: &[
        ColumnSpec::new("exist", Dtype::Text).required(),
        ColumnSpec::new("projectName", Dtype::Text),
        ColumnSpec::new("MediaType", Dtype::Text),
        ColumnSpec::new("RecordingEquipment", Dtype::Text),
        ColumnSpec::new("SamplingRate", Dtype::Float),
        ColumnSpec::new("Resolution", Dtype::Integer),
        ColumnSpec::new("QualityOfRecording", Dtype::Text),
        ColumnSpec::new("TypeOfRecording", Dtype::Text).required(),
        ColumnSpec::new("MicrophoneTrademark", Dtype::Text),
        ColumnSpec::new("IsCurrent1", Dtype::Text).required(),
        ColumnSpec::new("Country", Dtype::Text),
        ColumnSpec::new("State", Dtype::Text),
        ColumnSpec::new("County", Dtype::Text),
        ColumnSpec::new("LocalityDescription", Dtype::Text),
        ColumnSpec::new("Habitat", Dtype::Text),
        ColumnSpec::new("HabitatCharacteristics", Dtype::Text),
        ColumnSpec::new("MinimumEleveation", Dtype::Text),
        ColumnSpec::new("Latitude", Dtype::Float).required(),
        ColumnSpec::new("Longitude", Dtype::Float).required(),
        ColumnSpec::new("GeodeticDatum", Dtype::Text).required(),
        ColumnSpec::new("geolocationDevice", Dtype::Text),
        ColumnSpec::new("StartDate", Dtype::Text),
        ColumnSpec::new("RecordNumber", Dtype::Text).required(),
        ColumnSpec::new("CollectorFirstName1", Dtype::Text),
        ColumnSpec::new("CollectorLastName1", Dtype::Text),
        ColumnSpec::new("PreparedFirstName1", Dtype::Text),
        ColumnSpec::new("PreparedLastName1", Dtype::Text),
        ColumnSpec::new("FieldNumber", Dtype::Text).required().unique(),
        ColumnSpec::new("CatalogNumber", Dtype::Text),
        ColumnSpec::new("CatalogerLastName", Dtype::Text),
        ColumnSpec::new("CatalogerFirstName", Dtype::Text),
        ColumnSpec::new("catalogedDate", Dtype::Text),
        ColumnSpec::new("FolderLocation", Dtype::Text),
        ColumnSpec::new("Duration(HH:MM:SS)", Dtype::Text),
        ColumnSpec::new("PublishedRepository", Dtype::Text),
        ColumnSpec::new("CommentsOfTheRecording", Dtype::Text),
        ColumnSpec::new("Kingdom", Dtype::Text),
        ColumnSpec::new("VerbatimLocality", Dtype::Text),
        ColumnSpec::new("NationalParkName", Dtype::Text),
        ColumnSpec::new("EndDate", Dtype::Text),
        ColumnSpec::new("EventTime", Dtype::Text),
        ColumnSpec::new("Statum", Dtype::Float),
        ColumnSpec::new("CollectingMethod", Dtype::Text),
        ColumnSpec::new("eventRemarks", Dtype::Text),
        ColumnSpec::new("PrepType1", Dtype::Text),
        ColumnSpec::new("CountAmt1", Dtype::Integer),
        ColumnSpec::new("Description1", Dtype::Text),
        ColumnSpec::new("OtherCatalogNumber1", Dtype::Text),
    ],
    exact_columns: true,
};

pub const DWC_EVENTS: PamSchema = PamSchema {
    name: "DwCEvents",
    columns: &[
        ColumnSpec::new("eventID", Dtype::Text).required().unique(),
        ColumnSpec::new("locationID", Dtype::Text),
        ColumnSpec::new("locality", Dtype::Text),
        ColumnSpec::new("decimalLatitude", Dtype::Float).required(),
        ColumnSpec::new("decimalLongitude", Dtype::Float).required(),
        ColumnSpec::new("geodeticDatum", Dtype::Text).required(),
        ColumnSpec::new("eventDate", Dtype::Text).required(),
        ColumnSpec::new("samplingProtocol", Dtype::Text),
        ColumnSpec::new("habitat", Dtype::Text),
        ColumnSpec::new("recordedBy", Dtype::Text),
        ColumnSpec::new("eventRemarks", Dtype::Text),
    ],
    exact_columns: true,
};

/// Field sheet columns carried into the CSA sheet under their catalogue names.
const SHEET_TO_CSA: &[(&str, &str)] = &[
    ("deploymentID", "FieldNumber"),
    ("recorderID", "RecordingEquipment"),
    ("locationName", "VerbatimLocality"),
    ("habitat", "Habitat"),
    ("deploymentStartDate", "StartDate"),
    ("deploymentEndDate", "EndDate"),
    ("recorderHeight", "Statum"),
    ("recorderConfiguration", "CollectingMethod"),
    ("setupByName", "CollectorFirstName1"),
    ("setupByLastName", "CollectorLastName1"),
    ("deploymentComments", "CommentsOfTheRecording"),
];

/// Catalogue columns a team may add to its field sheet as extra columns.
const SHEET_CSA_EXTRAS: &[&str] = &[
    "projectName",
    "MediaType",
    "QualityOfRecording",
    "Country",
    "State",
    "County",
    "NationalParkName",
    "HabitatCharacteristics",
    "MinimumEleveation",
    "geolocationDevice",
    "FolderLocation",
];

/// Left for the collection curator to fill in.
const CURATOR_COLUMNS: &[&str] = &[
    "CatalogNumber",
    "OtherCatalogNumber1",
    "catalogedDate",
    "PublishedRepository",
    "CatalogerFirstName",
    "CatalogerLastName",
    "PreparedFirstName1",
    "PreparedLastName1",
    "eventRemarks",
];

// ---------------------------------------------------------------------------
// CSA events
// ---------------------------------------------------------------------------

/// `3725.4` seconds → `01:02:05`.
pub fn format_hms(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    format!("{:02}:{:02}:{:02}", total / 3600, total % 3600 / 60, total % 60)
}

/// Per deployment: first sample rate and bit depth, summed file length and
/// file count.
fn media_per_deployment(media: &Table) -> Table {
    let mut table = Table::new(["FieldNumber", "SamplingRate", "Resolution", "Duration(HH:MM:SS)", "CountAmt1"]);
    for (deployment, rows) in group_indices(media, "deploymentID") {
        let first = rows[0];
        let seconds: f64 = rows.iter().filter_map(|&r| media.get(r, "fileLength").as_f64()).sum();
        table.push_row(vec![
            deployment,
            media.get(first, "sampleRate").clone(),
            media.get(first, "bitDepth").clone(),
            Value::String(format_hms(seconds)),
            Value::Integer(rows.len() as i64),
        ]);
    }
    table
}

/// Build the CSA events sheet from Deployments, Media and the field sheet.
pub fn deployments_to_csa_events(
    deployments: &Table,
    media: &Table,
    field_sheet: &Table,
    offset: FixedOffset,
) -> Result<Table> {
    let mut events = deployments.select(&["deploymentID", "latitude", "longitude", "recorderModel"]);
    events.rename(&[
        ("deploymentID", "FieldNumber"),
        ("latitude", "Latitude"),
        ("longitude", "Longitude"),
        ("recorderModel", "MicrophoneTrademark"),
    ]);
    let events = left_join(&events, &media_per_deployment(media), "FieldNumber");

    let mut sheet_columns: Vec<&str> = SHEET_TO_CSA.iter().map(|(from, _)| *from).collect();
    sheet_columns.extend(["deploymentStartTime", "deploymentEndTime"]);
    sheet_columns.extend(SHEET_CSA_EXTRAS);
    let mut sheet = field_sheet.select(&sheet_columns);
    sheet.rename(SHEET_TO_CSA);
    sheet.derive_column("EventTime", |t, r| {
        let start = t.get(r, "deploymentStartTime").as_text();
        let end = t.get(r, "deploymentEndTime").as_text();
        if start.is_none() && end.is_none() {
            return Value::Null;
        }
        Value::String(format!("{} | {}", start.unwrap_or_default(), end.unwrap_or_default()))
    });
    sheet.drop_columns(&["deploymentStartTime", "deploymentEndTime"]);
    let mut events = left_join(&events, &sheet, "FieldNumber");

    for (column, value) in [
        ("exist", "Yes"),
        ("TypeOfRecording", "Monitoreo Acústico Pasivo"),
        ("GeodeticDatum", "WGS84"),
        ("Description1", "WAV"),
        ("Kingdom", "Animalia"),
        ("PrepType1", "Bloque de audios"),
        ("IsCurrent1", "Yes"),
    ] {
        events.fill_column(column, Value::from(value));
    }
    events.derive_column("RecordNumber", |t, r| t.get(r, "FieldNumber").clone());
    events.derive_column("LocalityDescription", |t, r| t.get(r, "HabitatCharacteristics").clone());
    for column in CURATOR_COLUMNS {
        events.fill_column(column, Value::Null);
    }

    let events = CSA_EVENTS.validate(&events, offset).context("building the CSA events sheet")?;
    log::info!("Exported {} deployments to the CSA events sheet", events.len());
    Ok(events)
}

// ---------------------------------------------------------------------------
// Darwin Core events
// ---------------------------------------------------------------------------

/// Darwin Core Event rows: `eventDate` is the ISO 8601 interval
/// `deploymentStart/deploymentEnd`.
pub fn deployments_to_dwc_events(deployments: &Table, offset: FixedOffset) -> Result<Table> {
    let mut events = deployments.select(&[
        "deploymentID",
        "locationID",
        "locationName",
        "latitude",
        "longitude",
        "deploymentStart",
        "deploymentEnd",
        "recorderConfiguration",
        "habitat",
        "setupBy",
        "deploymentComments",
    ]);
    events.rename(&[
        ("deploymentID", "eventID"),
        ("locationName", "locality"),
        ("latitude", "decimalLatitude"),
        ("longitude", "decimalLongitude"),
        ("recorderConfiguration", "samplingProtocol"),
        ("setupBy", "recordedBy"),
        ("deploymentComments", "eventRemarks"),
    ]);
    events.derive_column("eventDate", |t, r| {
        match (t.get(r, "deploymentStart").as_timestamp(), t.get(r, "deploymentEnd").as_timestamp()) {
            (Some(start), Some(end)) => Value::String(format!(
                "{}/{}",
                start.format("%Y-%m-%dT%H:%M:%S%:z"),
                end.format("%Y-%m-%dT%H:%M:%S%:z")
            )),
            _ => Value::Null,
        }
    });
    events.drop_columns(&["deploymentStart", "deploymentEnd"]);
    events.fill_column("geodeticDatum", Value::from("WGS84"));

    let events = DWC_EVENTS.validate(&events, offset).context("building Darwin Core events")?;
    log::info!("Exported {} deployments as Darwin Core events", events.len());
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn ts(s: &str) -> Value {
        Value::Timestamp(DateTime::parse_from_rfc3339(s).unwrap())
    }

    fn deployments() -> Table {
        Table::from_rows(
            [
                "deploymentID",
                "locationID",
                "locationName",
                "latitude",
                "longitude",
                "deploymentStart",
                "deploymentEnd",
                "recorderModel",
                "recorderConfiguration",
                "habitat",
                "setupBy",
                "deploymentComments",
            ]
            .map(String::from)
            .to_vec(),
            vec![
                vec![
                    "S1".into(),
                    "L1".into(),
                    "north".into(),
                    4.61.into(),
                    (-74.08).into(),
                    ts("2024-03-01T05:00:00-05:00"),
                    ts("2024-03-03T05:00:00-05:00"),
                    "AudioMoth".into(),
                    "8 kHz".into(),
                    "forest".into(),
                    "Ana Rojas".into(),
                    Value::Null,
                ],
                vec![
                    "S2".into(),
                    Value::Null,
                    "south".into(),
                    4.60.into(),
                    (-74.07).into(),
                    ts("2024-03-01T06:00:00-05:00"),
                    ts("2024-03-02T06:00:00-05:00"),
                    "SM4".into(),
                    "8 kHz".into(),
                    Value::Null,
                    Value::Null,
                    "flooded".into(),
                ],
            ],
        )
    }

    fn media() -> Table {
        Table::from_rows(
            vec!["deploymentID".into(), "sampleRate".into(), "bitDepth".into(), "fileLength".into()],
            vec![
                vec!["S1".into(), 48000.0.into(), Value::Integer(16), 1800.0.into()],
                vec!["S1".into(), 48000.0.into(), Value::Integer(16), 1925.5.into()],
                vec!["S2".into(), 96000.0.into(), Value::Integer(24), 60.0.into()],
            ],
        )
    }

    fn field_sheet() -> Table {
        Table::from_rows(
            [
                "deploymentID",
                "deploymentStartTime",
                "deploymentEndTime",
                "habitat",
                "setupByName",
                "recorderHeight",
                "Country",
                "HabitatCharacteristics",
            ]
            .map(String::from)
            .to_vec(),
            vec![vec![
                "S1".into(),
                "05:00:00".into(),
                "05:00:00".into(),
                "forest".into(),
                "Ana".into(),
                1.5.into(),
                "Colombia".into(),
                "secondary forest edge".into(),
            ]],
        )
    }

    #[test]
    fn durations_format_as_hours_minutes_seconds() {
        assert_eq!(format_hms(3725.5), "01:02:06");
        assert_eq!(format_hms(59.4), "00:00:59");
        assert_eq!(format_hms(90_000.0), "25:00:00");
    }

    #[test]
    fn csa_sheet_joins_media_and_field_sheet() {
        let events = deployments_to_csa_events(&deployments(), &media(), &field_sheet(), utc()).unwrap();

        assert_eq!(events.columns(), CSA_EVENTS.column_names().as_slice());
        assert_eq!(events.len(), 2);
        assert_eq!(events.get(0, "FieldNumber"), &Value::from("S1"));
        assert_eq!(events.get(0, "RecordNumber"), &Value::from("S1"));
        assert_eq!(events.get(0, "MicrophoneTrademark"), &Value::from("AudioMoth"));
        assert_eq!(events.get(0, "SamplingRate"), &Value::Float(48000.0));
        assert_eq!(events.get(0, "Resolution"), &Value::Integer(16));
        assert_eq!(events.get(0, "Duration(HH:MM:SS)"), &Value::from("01:02:06"));
        assert_eq!(events.get(0, "CountAmt1"), &Value::Integer(2));
        assert_eq!(events.get(0, "EventTime"), &Value::from("05:00:00 | 05:00:00"));
        assert_eq!(events.get(0, "Statum"), &Value::Float(1.5));
        assert_eq!(events.get(0, "Country"), &Value::from("Colombia"));
        assert_eq!(events.get(0, "LocalityDescription"), &Value::from("secondary forest edge"));
        assert_eq!(events.get(0, "GeodeticDatum"), &Value::from("WGS84"));
        assert!(events.get(0, "CatalogNumber").is_null());

        // S2 has media but no field sheet row.
        assert_eq!(events.get(1, "CountAmt1"), &Value::Integer(1));
        assert!(events.get(1, "Habitat").is_null());
        assert_eq!(events.get(1, "exist"), &Value::from("Yes"));
    }

    #[test]
    fn dwc_events_carry_the_deployment_interval() {
        let events = deployments_to_dwc_events(&deployments(), utc()).unwrap();

        assert_eq!(events.columns(), DWC_EVENTS.column_names().as_slice());
        assert_eq!(events.get(0, "eventID"), &Value::from("S1"));
        assert_eq!(
            events.get(0, "eventDate"),
            &Value::from("2024-03-01T05:00:00-05:00/2024-03-03T05:00:00-05:00")
        );
        assert_eq!(events.get(0, "recordedBy"), &Value::from("Ana Rojas"));
        assert_eq!(events.get(1, "eventRemarks"), &Value::from("flooded"));
        assert_eq!(events.get(1, "geodeticDatum"), &Value::from("WGS84"));
    }
}
