//! Topic scheduling: which topics run on a given date.
//!
//! Pure functions over an explicit [`RotationTable`]; no I/O.

use std::collections::HashMap;

use chrono::{Datelike, FixedOffset, NaiveDate, Utc, Weekday};
use tracing::debug;

use dailybrief_markdown::article_slug;
use dailybrief_shared::{DailyBriefError, Result, RotationTable, Topic, check_rotation};

const WEEK: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// "Today" in the configured offset.
pub fn today_in(offset: FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(&offset).date_naive()
}

/// Every topic scheduled for `today`, highest priority first.
///
/// Topics naming the weekday win; when none do, the `any` topics are used.
/// Ties are broken by id. `max_topics_per_day` truncates the list.
/// Topics that would publish to the same slug on the same day are rejected.
pub fn schedule(today: NaiveDate, table: &RotationTable) -> Result<Vec<Topic>> {
    check_rotation(table)?;
    let weekday = today.weekday();
    let (picked, fallback) = resolve(weekday, table)?;

    debug!(
        %today,
        %weekday,
        fallback,
        topics = ?picked.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        "topics scheduled"
    );
    Ok(picked.into_iter().cloned().collect())
}

/// Topics for `weekday`, and whether the `any` fallback was used.
fn resolve(weekday: Weekday, table: &RotationTable) -> Result<(Vec<&Topic>, bool)> {
    let mut picked: Vec<&Topic> = table
        .topics
        .iter()
        .filter(|t| t.day_affinity.names(weekday))
        .collect();
    let fallback = picked.is_empty();
    if fallback {
        picked = table
            .topics
            .iter()
            .filter(|t| t.day_affinity.is_any())
            .collect();
    }
    if picked.is_empty() {
        return Err(DailyBriefError::config(format!(
            "no topic scheduled for {weekday} and no \"any\" fallback topic"
        )));
    }

    picked.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    if let Some(cap) = table.max_topics_per_day {
        picked.truncate(cap);
    }
    check_slugs(weekday, &picked)?;
    Ok((picked, fallback))
}

/// Two topics on one day must not map to the same `{date}-{slug}.md`.
fn check_slugs(weekday: Weekday, topics: &[&Topic]) -> Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for topic in topics {
        let slug = article_slug(&topic.title, &topic.id);
        if let Some(other) = seen.insert(slug.clone(), &topic.id) {
            return Err(DailyBriefError::config(format!(
                "topics {other:?} and {:?} both publish as {slug:?} on {weekday}",
                topic.id
            )));
        }
    }
    Ok(())
}

/// The single highest-priority topic for `today`.
pub fn select(today: NaiveDate, table: &RotationTable) -> Result<Topic> {
    schedule(today, table)?
        .into_iter()
        .next()
        .ok_or_else(|| DailyBriefError::config("no topic scheduled"))
}

/// Weekdays with no matching topic and no `any` fallback.
pub fn uncovered_weekdays(table: &RotationTable) -> Vec<Weekday> {
    WEEK.iter()
        .copied()
        .filter(|day| {
            !table
                .topics
                .iter()
                .any(|t| t.day_affinity.names(*day) || t.day_affinity.is_any())
        })
        .collect()
}

/// Strict check for a whole week: the table is well formed, every weekday
/// resolves, and no day has colliding slugs.
pub fn validate(table: &RotationTable) -> Result<()> {
    check_rotation(table)?;
    let uncovered = uncovered_weekdays(table);
    if !uncovered.is_empty() {
        return Err(DailyBriefError::config(format!(
            "no topic for {} and no \"any\" fallback topic",
            uncovered
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }
    for day in WEEK {
        resolve(day, table)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dailybrief_shared::{DayAffinity, parse_rotation};

    fn topic(id: &str, days: DayAffinity, priority: i32) -> Topic {
        Topic {
            id: id.into(),
            title: id.to_uppercase(),
            search_query: format!("{id} news"),
            day_affinity: days,
            priority,
        }
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
    }

    fn table() -> RotationTable {
        RotationTable {
            max_topics_per_day: None,
            topics: vec![
                topic("ai-news", DayAffinity::Days(vec![Weekday::Mon]), 5),
                topic("chips", DayAffinity::Days(vec![Weekday::Mon, Weekday::Thu]), 5),
                topic("policy", DayAffinity::Days(vec![Weekday::Mon]), 9),
                topic("general", DayAffinity::Any, 0),
            ],
        }
    }

    #[test]
    fn orders_by_priority_then_id() {
        let ids: Vec<_> = schedule(monday(), &table())
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["policy", "ai-news", "chips"]);
        assert_eq!(select(monday(), &table()).unwrap().id, "policy");
    }

    #[test]
    fn falls_back_to_any_topics() {
        let tuesday = monday().succ_opt().unwrap();
        let picked = schedule(tuesday, &table()).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "general");
    }

    #[test]
    fn respects_max_topics_per_day() {
        let mut t = table();
        t.max_topics_per_day = Some(2);
        assert_eq!(schedule(monday(), &t).unwrap().len(), 2);
    }

    #[test]
    fn every_weekday_resolves_deterministically() {
        let t = table();
        for offset in 0..7 {
            let day = monday() + chrono::Days::new(offset);
            let first = select(day, &t).unwrap();
            let again = select(day, &t).unwrap();
            assert_eq!(first, again);
            assert!(first.day_affinity.names(day.weekday()) || first.day_affinity.is_any());
        }
    }

    #[test]
    fn unresolvable_weekday_is_config_error() {
        let t = RotationTable {
            max_topics_per_day: None,
            topics: vec![topic("ai-news", DayAffinity::Days(vec![Weekday::Mon]), 0)],
        };
        let tuesday = monday().succ_opt().unwrap();
        assert!(matches!(
            schedule(tuesday, &t),
            Err(DailyBriefError::Config { .. })
        ));

        let err = validate(&t).unwrap_err();
        assert!(err.to_string().contains("Tue"));
        assert!(validate(&table()).is_ok());
    }

    #[test]
    fn empty_and_duplicate_tables_rejected() {
        assert!(schedule(monday(), &RotationTable::default()).is_err());

        let mut t = table();
        t.topics.push(topic("ai-news", DayAffinity::Any, 1));
        assert!(matches!(
            schedule(monday(), &t),
            Err(DailyBriefError::Config { .. })
        ));
    }

    #[test]
    fn partial_week_resolves_on_covered_days() {
        let t = RotationTable {
            max_topics_per_day: None,
            topics: vec![topic("ai-news", DayAffinity::Days(vec![Weekday::Mon]), 0)],
        };
        assert_eq!(select(monday(), &t).unwrap().id, "ai-news");
        assert_eq!(uncovered_weekdays(&t).len(), 6);
        assert!(!uncovered_weekdays(&t).contains(&Weekday::Mon));
        assert!(uncovered_weekdays(&table()).is_empty());
    }

    #[test]
    fn same_day_slug_collision_rejected() {
        let mut a = topic("ai-news", DayAffinity::Days(vec![Weekday::Mon]), 1);
        a.title = "AI News".into();
        let mut b = topic("ai-news-jp", DayAffinity::Days(vec![Weekday::Mon]), 0);
        b.title = "AI-News".into();
        let mut t = RotationTable {
            max_topics_per_day: None,
            topics: vec![a, b, topic("general", DayAffinity::Any, 0)],
        };

        let err = schedule(monday(), &t).unwrap_err();
        assert!(matches!(err, DailyBriefError::Config { .. }));
        assert!(err.to_string().contains("\"ai-news\""));
        assert!(validate(&t).is_err());

        // Not on the same day: fine.
        t.topics[1].day_affinity = DayAffinity::Days(vec![Weekday::Tue]);
        assert_eq!(schedule(monday(), &t).unwrap().len(), 1);
        assert!(validate(&t).is_ok());

        // A cap that keeps only one of them also avoids the collision.
        t.topics[1].day_affinity = DayAffinity::Days(vec![Weekday::Mon]);
        t.max_topics_per_day = Some(1);
        assert_eq!(select(monday(), &t).unwrap().id, "ai-news");
    }

    #[test]
    fn rotation_file_with_full_weekday_names() {
        let t = parse_rotation(
            r#"
[[topics]]
id = "ai-news"
title = "AI News"
search_query = "AI industry news"
days = ["monday"]
"#,
        )
        .unwrap();
        assert_eq!(select(monday(), &t).unwrap().search_query, "AI industry news");
    }
}
