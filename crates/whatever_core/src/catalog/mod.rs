//! Note lifecycle catalog: categories, subcategories and transitions.
//!
//! # Responsibility
//! - Describe the subcategory state machine of every note category.
//! - Compute due dates for transitions that schedule a note.
//!
//! # Invariants
//! - The catalog is built once at startup and never mutated afterwards; it is
//!   shared as `Arc<Catalog>`.
//! - The first subcategory of a category is its inbox.
//! - Every transition target exists in the owning category.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod time;

use time::{local_date, local_midnight, remaining_days_in_month};

pub const TASK_UNSCHEDULED: &str = "notnow";
pub const TASK_SCHEDULED: &str = "scheduled";
pub const TASK_SOMEDAY: &str = "someday";
pub const TASK_DONE: &str = "done";

const NOTE_UNCATEGORIZED: &str = "process";
const NOTE_RECATEGORIZE: &str = "recategorize";
const NOTE_KINDS: &[(&str, &str)] = &[
    ("bookmark", "Bookmark"),
    ("reference", "Remember"),
    ("gratitude", "Gratitude"),
    ("idea", "Idea"),
    ("observation", "Observation"),
    ("reflection", "Reflection"),
    ("read", "Read"),
    ("listen", "Listen"),
    ("watch", "Watch"),
    ("quote", "Quote"),
    ("other", "Other"),
];

/// Day-count rule evaluated against the local date at transition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueRule {
    /// A fixed number of days after local midnight today.
    Days(i64),
    /// Until the end of the current week (Saturday), plus `extra_weeks`.
    RestOfWeek { extra_weeks: i64 },
    /// Until the first day of the month `months` ahead.
    RestOfMonth { months: u32 },
}

impl DueRule {
    /// Number of days to add to local midnight of `today`.
    pub fn days_from(self, today: chrono::NaiveDate) -> i64 {
        use chrono::Datelike;
        match self {
            Self::Days(days) => days,
            Self::RestOfWeek { extra_weeks } => {
                7 * extra_weeks + (6 - i64::from(today.weekday().num_days_from_sunday()))
            }
            Self::RestOfMonth { months } => remaining_days_in_month(today, months),
        }
    }

    /// Number of days for a transition performed at `now`.
    pub fn days_at(self, now: DateTime<Utc>, tz: FixedOffset) -> i64 {
        self.days_from(local_date(now, tz))
    }
}

/// A named edge in a category's subcategory graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub event: String,
    pub target: String,
    pub due: Option<DueRule>,
}

impl Transition {
    pub fn new(event: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            target: target.into(),
            due: None,
        }
    }

    pub fn with_due(mut self, rule: DueRule) -> Self {
        self.due = Some(rule);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subcategory {
    pub slug: String,
    pub display_name: String,
    /// Whether views should split this subcategory by timeframe.
    pub has_timeframes: bool,
    pub transitions: Vec<Transition>,
}

impl Subcategory {
    pub fn new(slug: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            display_name: display_name.into(),
            has_timeframes: false,
            transitions: Vec::new(),
        }
    }

    pub fn with_transitions(mut self, transitions: Vec<Transition>) -> Self {
        self.transitions = transitions;
        self
    }

    /// Returns the transition triggered by `event`, if any.
    pub fn transition(&self, event: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.event == event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub slug: String,
    pub display_name: String,
    /// Whether notes may be moved into this category from the UI.
    pub refile: bool,
    pub subcategories: Vec<Subcategory>,
}

impl Category {
    /// Subcategory every note lands in when entering this category.
    pub fn inbox(&self) -> Option<&Subcategory> {
        self.subcategories.first()
    }

    /// Subcategory shown first in navigation: the second one when present.
    pub fn default_subcategory(&self) -> Option<&Subcategory> {
        self.subcategories.get(1).or_else(|| self.subcategories.first())
    }

    pub fn subcategory(&self, slug: &str) -> Option<&Subcategory> {
        self.subcategories.iter().find(|s| s.slug == slug)
    }
}

/// A navigation window over due dates, e.g. "this week".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeframe {
    pub slug: String,
    /// Transition event that schedules a note into this window.
    pub event: String,
    pub display_name: String,
    pub rule: DueRule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    Empty,
    DuplicateCategory(String),
    EmptyCategory(String),
    DuplicateSubcategory {
        category: String,
        subcategory: String,
    },
    UnknownTarget {
        category: String,
        subcategory: String,
        event: String,
        target: String,
    },
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "catalog has no categories"),
            Self::DuplicateCategory(slug) => write!(f, "duplicate category `{slug}`"),
            Self::EmptyCategory(slug) => write!(f, "category `{slug}` has no subcategories"),
            Self::DuplicateSubcategory {
                category,
                subcategory,
            } => write!(f, "duplicate subcategory `{category}/{subcategory}`"),
            Self::UnknownTarget {
                category,
                subcategory,
                event,
                target,
            } => write!(
                f,
                "transition `{event}` on `{category}/{subcategory}` targets unknown subcategory `{target}`"
            ),
        }
    }
}

impl Error for CatalogError {}

/// Immutable lifecycle configuration shared by aggregates and read models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    categories: Vec<Category>,
    timeframes: Vec<Timeframe>,
    default_category: String,
}

impl Catalog {
    /// Builds a catalog after checking its structural invariants.
    pub fn new(
        categories: Vec<Category>,
        timeframes: Vec<Timeframe>,
        default_category: impl Into<String>,
    ) -> Result<Self, CatalogError> {
        let catalog = Self {
            categories,
            timeframes,
            default_category: default_category.into(),
        };
        catalog.validate()?;
        Ok(catalog)
    }

    /// The built-in categories: inbox, task, reference, people.
    pub fn standard() -> Self {
        let timeframes = standard_timeframes();
        Self {
            categories: vec![
                single_subcategory("inbox", "Inbox", true),
                task_category(&timeframes),
                note_category(),
                single_subcategory("people", "People", false),
            ],
            timeframes,
            default_category: "task".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.categories.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = BTreeSet::new();
        for category in &self.categories {
            if !seen.insert(category.slug.as_str()) {
                return Err(CatalogError::DuplicateCategory(category.slug.clone()));
            }
            if category.subcategories.is_empty() {
                return Err(CatalogError::EmptyCategory(category.slug.clone()));
            }

            let mut slugs = BTreeSet::new();
            for subcategory in &category.subcategories {
                if !slugs.insert(subcategory.slug.as_str()) {
                    return Err(CatalogError::DuplicateSubcategory {
                        category: category.slug.clone(),
                        subcategory: subcategory.slug.clone(),
                    });
                }
            }

            for subcategory in &category.subcategories {
                for transition in &subcategory.transitions {
                    if !slugs.contains(transition.target.as_str()) {
                        return Err(CatalogError::UnknownTarget {
                            category: category.slug.clone(),
                            subcategory: subcategory.slug.clone(),
                            event: transition.event.clone(),
                            target: transition.target.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Categories a note may be refiled into.
    pub fn refile_categories(&self) -> impl Iterator<Item = &Category> {
        self.categories.iter().filter(|c| c.refile)
    }

    pub fn category(&self, slug: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.slug == slug)
    }

    pub fn default_category(&self) -> Option<&Category> {
        self.category(&self.default_category)
    }

    pub fn subcategory(&self, category: &str, subcategory: &str) -> Option<&Subcategory> {
        self.category(category)?.subcategory(subcategory)
    }

    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    /// Due-date window `(start, end]` for the timeframe `slug` relative to `now`.
    ///
    /// Due dates are deadlines at the end of a period, so `end` itself belongs
    /// to the window.
    ///
    /// The first timeframe starts at the Unix epoch so overdue notes show up
    /// in it; later ones start where the previous timeframe ends. A window
    /// the previous one already covers is empty (`start == end`), e.g.
    /// "thisweek" on a Saturday or "thismonth" on the last day of a month.
    pub fn timeframe_range(
        &self,
        slug: &str,
        now: DateTime<Utc>,
        tz: FixedOffset,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let index = self.timeframes.iter().position(|tf| tf.slug == slug)?;
        let midnight = local_midnight(now, tz);
        let end = midnight + Duration::days(self.timeframes[index].rule.days_at(now, tz));
        let start = match index {
            0 => DateTime::<Utc>::UNIX_EPOCH,
            _ => midnight + Duration::days(self.timeframes[index - 1].rule.days_at(now, tz)),
        };
        Some((start.min(end), end))
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

fn standard_timeframes() -> Vec<Timeframe> {
    let timeframe = |slug: &str, display_name: &str, rule| Timeframe {
        slug: slug.to_string(),
        event: slug.to_string(),
        display_name: display_name.to_string(),
        rule,
    };
    vec![
        timeframe("today", "Today", DueRule::Days(1)),
        timeframe("tomorrow", "Tomorrow", DueRule::Days(2)),
        timeframe("thisweek", "This Week", DueRule::RestOfWeek { extra_weeks: 0 }),
        timeframe("nextweek", "Next Week", DueRule::RestOfWeek { extra_weeks: 1 }),
        timeframe("thismonth", "This Month", DueRule::RestOfMonth { months: 1 }),
        timeframe("nextmonth", "Next Month", DueRule::RestOfMonth { months: 2 }),
    ]
}

fn single_subcategory(slug: &str, display_name: &str, refile: bool) -> Category {
    Category {
        slug: slug.to_string(),
        display_name: display_name.to_string(),
        refile,
        subcategories: vec![Subcategory::new("default", "Default")],
    }
}

fn task_category(timeframes: &[Timeframe]) -> Category {
    let mut unscheduled: Vec<Transition> = timeframes
        .iter()
        .map(|tf| Transition::new(tf.event.as_str(), TASK_SCHEDULED).with_due(tf.rule))
        .collect();
    unscheduled.push(Transition::new("someday", TASK_SOMEDAY));
    unscheduled.push(Transition::new("done", TASK_DONE));

    let finish = || {
        vec![
            Transition::new("reschedule", TASK_UNSCHEDULED),
            Transition::new("done", TASK_DONE),
        ]
    };

    let mut scheduled = Subcategory::new(TASK_SCHEDULED, "Scheduled").with_transitions(finish());
    scheduled.has_timeframes = true;

    Category {
        slug: "task".to_string(),
        display_name: "Tasks".to_string(),
        refile: true,
        subcategories: vec![
            Subcategory::new(TASK_UNSCHEDULED, "Unscheduled").with_transitions(unscheduled),
            scheduled,
            Subcategory::new(TASK_SOMEDAY, "Someday").with_transitions(finish()),
            Subcategory::new(TASK_DONE, "Done")
                .with_transitions(vec![Transition::new("undo", TASK_UNSCHEDULED)]),
        ],
    }
}

fn note_category() -> Category {
    let mut subcategories = vec![Subcategory::new(NOTE_UNCATEGORIZED, "Uncategorized")
        .with_transitions(
            NOTE_KINDS
                .iter()
                .map(|(slug, _)| Transition::new(*slug, *slug))
                .collect(),
        )];
    subcategories.extend(NOTE_KINDS.iter().map(|(slug, display_name)| {
        Subcategory::new(*slug, *display_name)
            .with_transitions(vec![Transition::new(NOTE_RECATEGORIZE, NOTE_UNCATEGORIZED)])
    }));

    Category {
        slug: "reference".to_string(),
        display_name: "Notes".to_string(),
        refile: true,
        subcategories,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn tz() -> FixedOffset {
        FixedOffset::west_opt(7 * 3600).unwrap()
    }

    #[test]
    fn standard_catalog_is_consistent() {
        let catalog = Catalog::standard();
        catalog.validate().expect("standard catalog should validate");
        assert_eq!(catalog.default_category().unwrap().slug, "task");
        assert_eq!(
            catalog.category("task").unwrap().inbox().unwrap().slug,
            TASK_UNSCHEDULED
        );
        assert_eq!(
            catalog.category("task").unwrap().default_subcategory().unwrap().slug,
            TASK_SCHEDULED
        );
        let refile: Vec<_> = catalog.refile_categories().map(|c| c.slug.as_str()).collect();
        assert_eq!(refile, vec!["inbox", "task", "reference"]);
    }

    #[test]
    fn unscheduled_task_transitions_carry_due_rules() {
        let catalog = Catalog::standard();
        let notnow = catalog.subcategory("task", TASK_UNSCHEDULED).unwrap();
        let today = notnow.transition("today").unwrap();
        assert_eq!(today.target, TASK_SCHEDULED);
        assert_eq!(today.due, Some(DueRule::Days(1)));
        assert_eq!(notnow.transition("someday").unwrap().due, None);
        assert!(notnow.transition("undo").is_none());
    }

    #[test]
    fn catalog_rejects_transition_to_unknown_target() {
        let category = Category {
            slug: "broken".to_string(),
            display_name: "Broken".to_string(),
            refile: false,
            subcategories: vec![Subcategory::new("a", "A")
                .with_transitions(vec![Transition::new("go", "missing")])],
        };
        let err = Catalog::new(vec![category], Vec::new(), "broken").unwrap_err();
        assert!(matches!(err, CatalogError::UnknownTarget { .. }));
    }

    #[test]
    fn week_rule_counts_to_saturday() {
        // 2024-05-08 is a Wednesday.
        let wednesday = NaiveDate::from_ymd_opt(2024, 5, 8).unwrap();
        assert_eq!(DueRule::RestOfWeek { extra_weeks: 0 }.days_from(wednesday), 3);
        assert_eq!(DueRule::RestOfWeek { extra_weeks: 1 }.days_from(wednesday), 10);
    }

    #[test]
    fn timeframe_ranges_are_contiguous() {
        let catalog = Catalog::standard();
        let now = Utc.with_ymd_and_hms(2024, 5, 8, 18, 0, 0).unwrap();
        let (today_start, today_end) = catalog.timeframe_range("today", now, tz()).unwrap();
        let (tomorrow_start, tomorrow_end) =
            catalog.timeframe_range("tomorrow", now, tz()).unwrap();

        assert_eq!(today_start, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(today_end, tomorrow_start);
        assert_eq!(tomorrow_end - tomorrow_start, Duration::days(1));
        assert!(catalog.timeframe_range("never", now, tz()).is_none());
    }

    #[test]
    fn covered_timeframe_is_an_empty_window() {
        let catalog = Catalog::standard();
        // Saturday 2024-05-11, 10:00 local.
        let saturday = Utc.with_ymd_and_hms(2024, 5, 11, 17, 0, 0).unwrap();
        let (start, end) = catalog.timeframe_range("thisweek", saturday, tz()).unwrap();
        assert_eq!(start, end);
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 5, 11, 7, 0, 0).unwrap());

        let (next_start, next_end) =
            catalog.timeframe_range("nextweek", saturday, tz()).unwrap();
        assert_eq!(next_start, end);
        assert_eq!(next_end - next_start, Duration::days(7));
    }

    #[test]
    fn timeframe_windows_never_invert() {
        let catalog = Catalog::standard();
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 17, 0, 0).unwrap();
        for day in 0..400 {
            let now = first + Duration::days(day);
            for timeframe in catalog.timeframes() {
                let (start, end) = catalog.timeframe_range(&timeframe.slug, now, tz()).unwrap();
                assert!(start <= end, "{} inverted at {now}", timeframe.slug);
            }
        }
    }
}
