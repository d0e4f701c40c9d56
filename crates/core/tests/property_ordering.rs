use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use toggle_report_core::{
    parse_annotation_report, sorted_headers, Ida, IdaConfig, NullSink, Row, StateDump,
    ToggleKind,
};

#[derive(Clone, Debug)]
enum Sighting {
    FlagRow,
    Override(&'static str),
    Annotation,
}

const NAME: &str = "course.flag";

const ANNOTATION: &str = r#"
flags.py:
  - annotation_data: course.flag
    annotation_token: '.. toggle_name:'
    filename: flags.py
    line_number: 3
    report_group_id: 1
  - annotation_data: [CourseWaffleFlag]
    annotation_token: '.. toggle_implementation:'
    filename: flags.py
    line_number: 4
    report_group_id: 1
"#;

fn apply(ida: &mut Ida, sighting: &Sighting) {
    match sighting {
        Sighting::FlagRow => {
            let dump: StateDump = serde_json::from_value(json!([
                {"model": "waffle.flag", "pk": 1, "fields": {"name": NAME, "everyone": true}}
            ]))
            .unwrap();
            ida.add_state_dump(dump, "prod");
        }
        Sighting::Override(course) => {
            let dump: StateDump = serde_json::from_value(json!([
                {"model": "waffle_utils.waffleflagcourseoverridemodel", "pk": 2,
                 "fields": {"waffle_flag": NAME, "course_id": course, "override_choice": "on"}}
            ]))
            .unwrap();
            ida.add_state_dump(dump, "prod");
        }
        Sighting::Annotation => {
            ida.add_annotation_report(&parse_annotation_report(ANNOTATION).unwrap());
        }
    }
}

fn column() -> impl Strategy<Value = String> {
    ("[a-z]{1,6}", prop_oneof![Just(""), Just("_s"), Just("_a"), Just("name")])
        .prop_map(|(stem, tail)| format!("{stem}{tail}"))
}

proptest! {
    #[test]
    fn promotion_ignores_arrival_order(
        order in Just(vec![
            Sighting::FlagRow,
            Sighting::Override("course-v1:a"),
            Sighting::Override("course-v1:b"),
            Sighting::Annotation,
        ]).prop_shuffle()
    ) {
        let mut ida = Ida::new("lms", IdaConfig::default()).with_sink(Arc::new(NullSink));
        for sighting in &order {
            apply(&mut ida, sighting);
        }
        prop_assert_eq!(ida.len(), 1);
        prop_assert!(ida.get(ToggleKind::WaffleFlag, NAME).is_none());
        let toggle = ida.get(ToggleKind::CourseWaffleFlag, NAME).unwrap();
        prop_assert!(toggle.annotation().is_some());
        prop_assert_eq!(toggle.states().len(), 1);
        prop_assert_eq!(toggle.states()[0].course_counts(), Some((2, 0)));
        prop_assert_eq!(toggle.states()[0].is_active(), Some(true));
    }

    #[test]
    fn headers_do_not_depend_on_row_order(
        columns in prop::collection::vec(column(), 1..12),
        split in 0usize..12,
    ) {
        let split = split.min(columns.len());
        let first: Row = columns[..split].iter().map(|c| (c.clone(), String::new())).collect();
        let second: Row = columns[split..].iter().map(|c| (c.clone(), String::new())).collect();
        let priority = ["name", "ida_name"];
        let forward = sorted_headers(&[first.clone(), second.clone()], &priority);
        let backward = sorted_headers(&[second, first], &priority);
        prop_assert_eq!(&forward, &backward);

        let mut unique = columns.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(forward.len(), unique.len());

        let rank = |c: &str| (!c.contains("name"), if c.ends_with("_s") { 0 } else if c.ends_with("_a") { 1 } else { 2 });
        for pair in forward.windows(2) {
            prop_assert!(rank(pair[0].as_str()) <= rank(pair[1].as_str()), "{:?}", pair);
        }
    }
}
