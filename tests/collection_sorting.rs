//! Sorting behavior over a multi-field corpus: integer, int64, float,
//! multi-clause, and geo sorts.

use std::sync::Arc;

use serde_json::json;

use quarry::collection::{Collection, SearchRequest};
use quarry::manager::{CollectionManager, ManagerConfig};
use quarry::query::sort::SortClause;
use quarry::schema::{Field, FieldType};
use quarry::store::MemoryStore;

fn setup_manager() -> CollectionManager {
    let manager = CollectionManager::new(
        Arc::new(MemoryStore::new()),
        ManagerConfig {
            bootstrap_auth_key: "auth_key".to_string(),
            ..ManagerConfig::default()
        },
    )
    .unwrap();
    manager.load(100).unwrap();
    manager
}

/// An 18-document corpus with `title`, `starring`, `points`, `cast` fields.
fn multi_field_documents() -> Vec<serde_json::Value> {
    vec![
        json!({"id": "0",  "title": "The Shawshank Redemption", "starring": "Tim Robbins",      "points": 140, "cast": ["Tim Robbins", "Morgan Freeman"]}),
        json!({"id": "1",  "title": "The Godfather",            "starring": "Marlon Brando",    "points": 150, "cast": ["Marlon Brando", "Al Pacino"]}),
        json!({"id": "2",  "title": "Inception",                "starring": "Leonardo DiCaprio","points": 105, "cast": ["Leonardo DiCaprio"]}),
        json!({"id": "3",  "title": "Pulp Fiction",             "starring": "John Travolta",    "points": 115, "cast": ["John Travolta", "Uma Thurman"]}),
        json!({"id": "4",  "title": "The Age of Innocence",     "starring": "Daniel Day-Lewis", "points": 130, "cast": ["Daniel Day-Lewis"]}),
        json!({"id": "5",  "title": "Flags of Our Fathers",     "starring": "Ryan Phillippe",   "points": 165, "cast": ["Ryan Phillippe"]}),
        json!({"id": "6",  "title": "The Dark Knight",          "starring": "Christian Bale",   "points": 170, "cast": ["Christian Bale", "Heath Ledger"]}),
        json!({"id": "7",  "title": "Interstellar",             "starring": "Matthew McConaughey", "points": 125, "cast": ["Matthew McConaughey"]}),
        json!({"id": "8",  "title": "The Green Mile",           "starring": "Tom Hanks",        "points": 160, "cast": ["Tom Hanks"]}),
        json!({"id": "9",  "title": "Fight Club",               "starring": "Brad Pitt",        "points": 135, "cast": ["Brad Pitt", "Edward Norton"]}),
        json!({"id": "10", "title": "The Matrix Reloaded",      "starring": "Keanu Reeves",     "points": 120, "cast": ["Keanu Reeves"]}),
        json!({"id": "11", "title": "The Lord of the Rings",    "starring": "Elijah Wood",      "points": 190, "cast": ["Elijah Wood", "Ian McKellen"]}),
        json!({"id": "12", "title": "A Tale of Two Cities",     "starring": "Ronald Colman",    "points": 175, "cast": ["Ronald Colman"]}),
        json!({"id": "13", "title": "The Terminator",           "starring": "Arnold Schwarzenegger", "points": 110, "cast": ["Arnold Schwarzenegger"]}),
        json!({"id": "14", "title": "Gladiator",                "starring": "Russell Crowe",    "points": 145, "cast": ["Russell Crowe"]}),
        json!({"id": "15", "title": "Casablanca",               "starring": "Humphrey Bogart",  "points": 155, "cast": ["Humphrey Bogart"]}),
        json!({"id": "16", "title": "The Sixth Sense",          "starring": "Bruce Willis",     "points": 180, "cast": ["Bruce Willis"]}),
        json!({"id": "17", "title": "The Wizard of Oz",         "starring": "Judy Garland",     "points": 100, "cast": ["Judy Garland"]}),
    ]
}

fn load_multi_field_collection(
    manager: &CollectionManager,
    points_type: FieldType,
) -> Arc<Collection> {
    let fields = vec![
        Field::new("title", FieldType::String),
        Field::new("starring", FieldType::String),
        Field::new("points", points_type),
        Field::new("cast", FieldType::StringArray),
    ];

    let collection = manager
        .create_collection("coll_mul_fields", 4, fields, "points", 0, false)
        .unwrap();

    for doc in multi_field_documents() {
        collection.add(&doc.to_string()).unwrap();
    }

    collection
}

fn hit_ids(results: &serde_json::Value) -> Vec<String> {
    results["hits"]
        .as_array()
        .unwrap()
        .iter()
        .map(|hit| hit["document"]["id"].as_str().unwrap().to_string())
        .collect()
}

fn base_request(query: &str, per_page: usize) -> SearchRequest {
    SearchRequest {
        query_by: vec!["title".to_string()],
        per_page,
        num_typos: 0,
        prefix: false,
        ..SearchRequest::new(query)
    }
}

#[test]
fn test_sorting_order() {
    let manager = setup_manager();
    let collection = load_multi_field_collection(&manager, FieldType::Int32);

    let mut request = base_request("the", 15);
    request.sort_by = vec![SortClause::new("points", "ASC")];

    let results = collection.search(&request).unwrap();
    assert_eq!(results["hits"].as_array().unwrap().len(), 10);
    assert_eq!(
        hit_ids(&results),
        vec!["17", "13", "10", "4", "0", "1", "8", "6", "16", "11"]
    );

    // limiting results to just 5; the order keyword is case-insensitive
    let mut request = base_request("the", 5);
    request.sort_by = vec![SortClause::new("points", "asc")];

    let results = collection.search(&request).unwrap();
    assert_eq!(results["hits"].as_array().unwrap().len(), 5);
    assert_eq!(hit_ids(&results), vec!["17", "13", "10", "4", "0"]);

    // descending
    let mut request = base_request("the", 15);
    request.sort_by = vec![SortClause::new("points", "dEsc")];

    let results = collection.search(&request).unwrap();
    assert_eq!(results["hits"].as_array().unwrap().len(), 10);
    assert_eq!(
        hit_ids(&results),
        vec!["11", "16", "6", "8", "1", "0", "10", "4", "13", "17"]
    );

    // with an empty sort list, results fall back to the default sorting
    // field in descending order, since all match scores are equal
    let request = base_request("of", 10);

    let results = collection.search(&request).unwrap();
    assert_eq!(results["found"], 5);
    assert_eq!(hit_ids(&results), vec!["11", "12", "5", "4", "17"]);

    manager.drop_collection("coll_mul_fields", true).unwrap();
}

#[test]
fn test_default_sorting_field_validations() {
    let manager = setup_manager();

    let fields = vec![
        Field::new("name", FieldType::String),
        Field::new("tags", FieldType::StringArray).facet(true),
        Field::new("age", FieldType::Int32),
        Field::new("average", FieldType::Int32),
    ];

    // must be a numerical field
    let err = manager
        .create_collection("sample_collection", 4, fields.clone(), "name", 0, false)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Default sorting field `name` must be a single valued numerical field."
    );

    // must exist in the schema
    let err = manager
        .create_collection("sample_collection", 4, fields, "NOT-DEFINED", 0, false)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Default sorting field is defined as `NOT-DEFINED` but is not found in the schema."
    );

    // must not be optional
    let fields = vec![
        Field::new("title", FieldType::String),
        Field::new("points", FieldType::Int32).optional(true),
    ];
    let err = manager
        .create_collection("sample_collection", 4, fields, "points", 0, false)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Default sorting field `points` cannot be an optional field."
    );
}

#[test]
fn test_int64_as_default_sorting_field() {
    let manager = setup_manager();
    let fields = vec![
        Field::new("title", FieldType::String),
        Field::new("starring", FieldType::String),
        Field::new("points", FieldType::Int64),
        Field::new("cast", FieldType::StringArray),
    ];
    let collection = manager
        .create_collection("coll_mul_fields", 4, fields, "points", 0, false)
        .unwrap();

    let points: [i64; 4] = [
        343234324234233234,
        343234324234233232,
        343234324234233235,
        343234324234233231,
    ];
    for value in points {
        let doc = json!({"title": "foo", "starring": "bar", "points": value, "cast": ["baz"]});
        collection.add(&doc.to_string()).unwrap();
    }

    let mut request = base_request("foo", 10);
    request.sort_by = vec![SortClause::new("points", "ASC")];
    let results = collection.search(&request).unwrap();
    assert_eq!(results["hits"].as_array().unwrap().len(), 4);
    assert_eq!(hit_ids(&results), vec!["3", "1", "0", "2"]);

    let mut request = base_request("foo", 10);
    request.sort_by = vec![SortClause::new("points", "desc")];
    let results = collection.search(&request).unwrap();
    assert_eq!(hit_ids(&results), vec!["2", "0", "1", "3"]);
}

#[test]
fn test_sort_on_float_fields() {
    let manager = setup_manager();
    let fields = vec![
        Field::new("title", FieldType::String),
        Field::new("score", FieldType::Float),
        Field::new("average", FieldType::Float),
    ];
    let collection = manager
        .create_collection("coll_float_fields", 4, fields, "score", 0, false)
        .unwrap();

    let docs = [
        (9.5, 6.0),
        (8.5, 7.2),
        (10.0, 5.0),
        (9.0, 6.5),
        (7.5, 8.0),
        (7.5, 9.0),
        (7.5, 7.0),
    ];
    for (score, average) in docs {
        let doc = json!({"title": "Jeremy Irons", "score": score, "average": average});
        collection.add(&doc.to_string()).unwrap();
    }

    let mut request = base_request("Jeremy", 10);
    request.sort_by = vec![
        SortClause::new("score", "DESC"),
        SortClause::new("average", "DESC"),
    ];
    let results = collection.search(&request).unwrap();
    assert_eq!(results["hits"].as_array().unwrap().len(), 7);
    assert_eq!(hit_ids(&results), vec!["2", "0", "3", "1", "5", "4", "6"]);

    let mut request = base_request("Jeremy", 10);
    request.sort_by = vec![
        SortClause::new("score", "ASC"),
        SortClause::new("average", "ASC"),
    ];
    let results = collection.search(&request).unwrap();
    assert_eq!(hit_ids(&results), vec!["6", "4", "5", "1", "3", "0", "2"]);

    // second clause flipped to descending
    let mut request = base_request("Jeremy", 10);
    request.sort_by = vec![
        SortClause::new("score", "ASC"),
        SortClause::new("average", "DESC"),
    ];
    let results = collection.search(&request).unwrap();
    assert_eq!(hit_ids(&results), vec!["5", "4", "6", "1", "3", "0", "2"]);

    manager.drop_collection("coll_float_fields", true).unwrap();
}

#[test]
fn test_three_sort_fields_limit() {
    let manager = setup_manager();
    let fields = vec![
        Field::new("title", FieldType::String),
        Field::new("points", FieldType::Int32),
        Field::new("average", FieldType::Int32),
        Field::new("min", FieldType::Int32),
        Field::new("max", FieldType::Int32),
    ];
    let collection = manager
        .create_collection("coll1", 4, fields, "points", 0, false)
        .unwrap();

    let doc = json!({
        "id": "100",
        "title": "The quick brown fox",
        "points": 25,
        "average": 25,
        "min": 25,
        "max": 25,
    });
    collection.add(&doc.to_string()).unwrap();

    let mut request = base_request("the", 10);
    request.sort_by = vec![
        SortClause::new("points", "DESC"),
        SortClause::new("average", "DESC"),
        SortClause::new("max", "DESC"),
        SortClause::new("min", "DESC"),
    ];

    let err = collection.search(&request).unwrap_err();
    assert_eq!(err.to_string(), "Only upto 3 sort_by fields can be specified.");
}

#[test]
fn test_negative_int64_value() {
    let manager = setup_manager();
    let fields = vec![
        Field::new("title", FieldType::String),
        Field::new("points", FieldType::Int64),
    ];
    let collection = manager
        .create_collection("coll1", 4, fields, "points", 0, false)
        .unwrap();

    let doc = json!({"id": "100", "title": "The quick brown fox", "points": -2678400});
    collection.add(&doc.to_string()).unwrap();

    let mut request = base_request("*", 10);
    request.filter_by = "points:>=1577836800".to_string();
    request.sort_by = vec![SortClause::new("points", "DESC")];

    let results = collection.search(&request).unwrap();
    assert_eq!(results["found"], 0);

    // the negative value survives the round trip and still matches text
    let request = base_request("the", 10);
    let results = collection.search(&request).unwrap();
    assert_eq!(results["found"], 1);
    assert_eq!(results["hits"][0]["document"]["points"], -2678400i64);
}

#[test]
fn test_geo_point_sorting_and_filtering() {
    let manager = setup_manager();
    let fields = vec![
        Field::new("title", FieldType::String),
        Field::new("loc", FieldType::Geopoint),
        Field::new("points", FieldType::Int32),
    ];
    let collection = manager
        .create_collection("coll1", 1, fields, "points", 0, false)
        .unwrap();

    let records: [(&str, f64, f64); 10] = [
        ("Palais Garnier", 48.872576479306765, 2.332291112241466),
        ("Sacre Coeur", 48.888286721920934, 2.342340862419206),
        ("Arc de Triomphe", 48.87538726829884, 2.296113163780903),
        ("Place de la Concorde", 48.86536119187326, 2.321850747347093),
        ("Louvre Musuem", 48.86065813197502, 2.3381285349616725),
        ("Les Invalides", 48.856648379569904, 2.3118555692631357),
        ("Eiffel Tower", 48.85821022164442, 2.294239067890161),
        ("Notre-Dame de Paris", 48.852455825574495, 2.35071182406452),
        ("Musee Grevin", 48.872370541246816, 2.3431536410008906),
        ("Pantheon", 48.84620987789056, 2.345152755563131),
    ];

    for (i, (title, lat, lng)) in records.iter().enumerate() {
        let doc = json!({
            "id": i.to_string(),
            "title": title,
            "loc": [lat, lng],
            "points": i,
        });
        collection.add(&doc.to_string()).unwrap();
    }

    // a large radius covering all points, with a reference near the Pantheon
    let expected_asc = ["9", "7", "4", "8", "0", "3", "5", "1", "6", "2"];

    let mut request = base_request("*", 10);
    request.filter_by = "loc: (48.84442912268208, 2.3490714964332353, 20 km)".to_string();
    request.sort_by = vec![SortClause::new(
        "loc(48.84442912268208, 2.3490714964332353)",
        "ASC",
    )];

    let results = collection.search(&request).unwrap();
    assert_eq!(results["found"], 10);
    assert_eq!(hit_ids(&results), expected_asc);

    // nearest hit reports its haversine distance
    assert_eq!(results["hits"][0]["geo_distance_meters"]["loc"], 348);

    // descending without a filter is the exact reverse permutation
    let mut request = base_request("*", 10);
    request.sort_by = vec![SortClause::new(
        "loc(48.84442912268208, 2.3490714964332353)",
        "DESC",
    )];

    let results = collection.search(&request).unwrap();
    assert_eq!(results["found"], 10);
    let expected_desc: Vec<&str> = expected_asc.iter().rev().copied().collect();
    assert_eq!(hit_ids(&results), expected_desc);

    // malformed geo sort formats
    for bad_name in ["loc(,2.3490714964332353)", "loc(x, y)"] {
        let mut request = base_request("*", 10);
        request.sort_by = vec![SortClause::new(bad_name, "ASC")];
        let err = collection.search(&request).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Geopoint sorting field `loc` must be in the `field(24.56,10.45):ASC` format."
        );
    }

    for (bad_name, missing) in [("loc(", "loc("), ("loc)", "loc)"), ("l()", "l")] {
        let mut request = base_request("*", 10);
        request.sort_by = vec![SortClause::new(bad_name, "ASC")];
        let err = collection.search(&request).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Could not find a field named `{missing}` in the schema for sorting.")
        );
    }

    manager.drop_collection("coll1", true).unwrap();
}
