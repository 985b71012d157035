//! Note aggregate.
//!
//! # Invariants
//! - Only `CreateNote` is accepted before the note exists.
//! - Category and subcategory always name an entry of the injected catalog
//!   at the time they were set.
//! - Text starting with `http` requests enrichment on create and update.

use super::{require_trimmed, Aggregate, ValidationError};
use crate::catalog::time::due_after_days;
use crate::catalog::Catalog;
use crate::clock::Clock;
use crate::model::command::NoteCommand;
use crate::model::event::{
    DomainEvent, NoteCategoryChanged, NoteCreated, NoteDueChanged, NoteEnriched,
    NoteEnrichmentFailed, NoteEnrichmentRequested, NoteOwnerSet, NoteSubcategoryChanged,
    NoteTextUpdated,
};
use crate::model::{AggregateId, AggregateKind};
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;

const ENRICHMENT_PREFIX: &str = "http";

/// Shared collaborators of every note instance.
pub struct NoteRules {
    pub catalog: Arc<Catalog>,
    pub clock: Arc<dyn Clock>,
    pub time_zone: FixedOffset,
}

impl NoteRules {
    pub fn new(catalog: Arc<Catalog>, clock: Arc<dyn Clock>, time_zone: FixedOffset) -> Self {
        Self {
            catalog,
            clock,
            time_zone,
        }
    }
}

/// Folded note state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteState {
    pub created: bool,
    pub owner: String,
    pub deleted: bool,
    pub text: String,
    pub category: String,
    pub subcategory: String,
    pub due: Option<DateTime<Utc>>,
}

pub struct NoteAggregate {
    id: AggregateId,
    rules: Arc<NoteRules>,
    state: NoteState,
}

impl NoteAggregate {
    pub fn new(id: AggregateId, rules: Arc<NoteRules>) -> Self {
        Self {
            id,
            rules,
            state: NoteState::default(),
        }
    }

    pub fn state(&self) -> &NoteState {
        &self.state
    }

    fn now(&self) -> DateTime<Utc> {
        self.rules.clock.now()
    }

    fn text_events(&self, text: String, first: DomainEvent) -> Vec<DomainEvent> {
        let mut events = vec![first];
        if text.starts_with(ENRICHMENT_PREFIX) {
            events.push(DomainEvent::NoteEnrichmentRequested(
                NoteEnrichmentRequested {
                    text,
                    requested_at: self.now(),
                },
            ));
        }
        events
    }

    fn create(
        &self,
        owner: &str,
        text: &str,
        category: &str,
        subcategory: &str,
    ) -> Result<Vec<DomainEvent>, ValidationError> {
        if self.state.created {
            return Err(ValidationError::NoteAlreadyExists(self.id));
        }

        let owner = require_trimmed(owner, ValidationError::EmptyOwner)?;
        let text = require_trimmed(text, ValidationError::EmptyText)?;
        let category = require_trimmed(category, ValidationError::EmptyCategory)?;
        let subcategory = require_trimmed(subcategory, ValidationError::EmptySubcategory)?;

        let known = self
            .rules
            .catalog
            .category(&category)
            .ok_or_else(|| ValidationError::UnknownCategory(category.clone()))?;
        if known.subcategory(&subcategory).is_none() {
            return Err(ValidationError::UnknownSubcategory {
                category,
                subcategory,
            });
        }

        let created = DomainEvent::NoteCreated(NoteCreated {
            owner,
            text: text.clone(),
            category,
            subcategory,
            created_at: self.now(),
        });
        Ok(self.text_events(text, created))
    }

    fn set_category(&self, category: &str) -> Result<Vec<DomainEvent>, ValidationError> {
        let category = require_trimmed(category, ValidationError::EmptyCategory)?;
        if self.state.category == category {
            return Err(ValidationError::SameCategory(category));
        }

        let inbox = self
            .rules
            .catalog
            .category(&category)
            .and_then(|c| c.inbox())
            .ok_or_else(|| ValidationError::UnknownCategory(category.clone()))?;

        Ok(vec![DomainEvent::NoteCategoryChanged(NoteCategoryChanged {
            subcategory: inbox.slug.clone(),
            category,
        })])
    }

    fn transition(&self, transition_event: &str) -> Result<Vec<DomainEvent>, ValidationError> {
        let event = transition_event.trim();
        let unknown = || ValidationError::UnknownTransition {
            subcategory: self.state.subcategory.clone(),
            event: event.to_string(),
        };

        let transition = self
            .rules
            .catalog
            .subcategory(&self.state.category, &self.state.subcategory)
            .and_then(|sub| sub.transition(event))
            .ok_or_else(unknown)?;

        if transition.target == self.state.subcategory {
            return Err(ValidationError::SameSubcategory(transition.target.clone()));
        }

        let mut events = vec![DomainEvent::NoteSubcategoryChanged(
            NoteSubcategoryChanged {
                subcategory: transition.target.clone(),
            },
        )];

        match transition.due {
            Some(rule) => {
                let now = self.now();
                let tz = self.rules.time_zone;
                events.push(DomainEvent::NoteDueChanged(NoteDueChanged {
                    due: due_after_days(now, tz, rule.days_at(now, tz)),
                }));
            }
            None if self.state.due.is_some() => events.push(DomainEvent::NoteDueCleared),
            None => {}
        }

        Ok(events)
    }
}

impl Aggregate for NoteAggregate {
    const KIND: AggregateKind = AggregateKind::Note;
    type Command = NoteCommand;

    fn id(&self) -> AggregateId {
        self.id
    }

    fn apply(&mut self, event: &DomainEvent) {
        let state = &mut self.state;
        match event {
            DomainEvent::NoteCreated(created) => {
                state.created = true;
                state.owner = created.owner.clone();
                state.text = created.text.clone();
                state.category = created.category.clone();
                state.subcategory = created.subcategory.clone();
            }
            DomainEvent::NoteOwnerSet(set) => state.owner = set.owner.clone(),
            DomainEvent::NoteDeleted => state.deleted = true,
            DomainEvent::NoteUndeleted => state.deleted = false,
            DomainEvent::NoteTextUpdated(updated) => state.text = updated.text.clone(),
            DomainEvent::NoteCategoryChanged(changed) => {
                state.category = changed.category.clone();
                state.subcategory = changed.subcategory.clone();
            }
            DomainEvent::NoteSubcategoryChanged(changed) => {
                state.subcategory = changed.subcategory.clone();
            }
            DomainEvent::NoteDueChanged(changed) => state.due = Some(changed.due),
            DomainEvent::NoteDueCleared => state.due = None,
            DomainEvent::NoteEnrichmentRequested(_)
            | DomainEvent::NoteEnriched(_)
            | DomainEvent::NoteEnrichmentFailed(_)
            | DomainEvent::RealmCreated(_) => {}
        }
    }

    fn handle(&self, command: NoteCommand) -> Result<Vec<DomainEvent>, ValidationError> {
        if let NoteCommand::CreateNote {
            owner,
            text,
            category,
            subcategory,
            ..
        } = &command
        {
            return self.create(owner, text, category, subcategory);
        }

        if !self.state.created {
            return Err(ValidationError::NoteNotFound(self.id));
        }

        match command {
            NoteCommand::CreateNote { .. } => Err(ValidationError::NoteAlreadyExists(self.id)),
            NoteCommand::SetNoteOwner { owner, .. } => {
                let owner = require_trimmed(&owner, ValidationError::EmptyOwner)?;
                Ok(vec![DomainEvent::NoteOwnerSet(NoteOwnerSet { owner })])
            }
            NoteCommand::DeleteNote { .. } => {
                if self.state.deleted {
                    return Err(ValidationError::AlreadyDeleted(self.id));
                }
                Ok(vec![DomainEvent::NoteDeleted])
            }
            NoteCommand::UndeleteNote { .. } => {
                if !self.state.deleted {
                    return Err(ValidationError::NotDeleted(self.id));
                }
                Ok(vec![DomainEvent::NoteUndeleted])
            }
            NoteCommand::UpdateNoteText { text, .. } => {
                let text = require_trimmed(&text, ValidationError::EmptyText)?;
                let updated = DomainEvent::NoteTextUpdated(NoteTextUpdated { text: text.clone() });
                Ok(self.text_events(text, updated))
            }
            NoteCommand::SetNoteCategory { category, .. } => self.set_category(&category),
            NoteCommand::TransitionNoteSubcategory {
                transition_event, ..
            } => self.transition(&transition_event),
            NoteCommand::SetNoteDue { due, .. } => {
                Ok(vec![DomainEvent::NoteDueChanged(NoteDueChanged { due })])
            }
            NoteCommand::ClearNoteDue { .. } => Ok(vec![DomainEvent::NoteDueCleared]),
            NoteCommand::CompleteNoteEnrichment {
                title, thumbnail, ..
            } => Ok(vec![DomainEvent::NoteEnriched(NoteEnriched {
                title,
                thumbnail,
                completed_at: self.now(),
            })]),
            NoteCommand::FailNoteEnrichment { .. } => {
                Ok(vec![DomainEvent::NoteEnrichmentFailed(NoteEnrichmentFailed {
                    failed_at: self.now(),
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{TASK_DONE, TASK_SCHEDULED, TASK_UNSCHEDULED};
    use crate::clock::FixedClock;
    use crate::model::event::EventKind;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn tz() -> FixedOffset {
        FixedOffset::west_opt(7 * 3600).unwrap()
    }

    fn rules(now: DateTime<Utc>) -> Arc<NoteRules> {
        Arc::new(NoteRules::new(
            Arc::new(Catalog::standard()),
            Arc::new(FixedClock::new(now)),
            tz(),
        ))
    }

    // Wednesday 2024-05-01 10:00 local.
    fn wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 17, 0, 0).unwrap()
    }

    fn created_note(text: &str) -> NoteAggregate {
        let mut note = NoteAggregate::new(Uuid::new_v4(), rules(wednesday()));
        let events = note
            .handle(NoteCommand::CreateNote {
                id: note.id(),
                owner: "u1".to_string(),
                text: text.to_string(),
                category: "task".to_string(),
                subcategory: TASK_UNSCHEDULED.to_string(),
            })
            .unwrap();
        for event in &events {
            note.apply(event);
        }
        note
    }

    fn kinds(events: &[DomainEvent]) -> Vec<EventKind> {
        events.iter().map(DomainEvent::kind).collect()
    }

    #[test]
    fn create_requests_enrichment_only_for_links() {
        let note = NoteAggregate::new(Uuid::new_v4(), rules(wednesday()));
        let create = |text: &str| NoteCommand::CreateNote {
            id: note.id(),
            owner: "u1".to_string(),
            text: text.to_string(),
            category: "task".to_string(),
            subcategory: TASK_UNSCHEDULED.to_string(),
        };

        assert_eq!(
            kinds(&note.handle(create("buy milk")).unwrap()),
            vec![EventKind::NoteCreated]
        );
        assert_eq!(
            kinds(&note.handle(create("  https://example.com ")).unwrap()),
            vec![EventKind::NoteCreated, EventKind::NoteEnrichmentRequested]
        );
    }

    #[test]
    fn create_rejects_blank_fields_and_unknown_catalog_entries() {
        let note = NoteAggregate::new(Uuid::new_v4(), rules(wednesday()));
        let create = |owner: &str, text: &str, category: &str, subcategory: &str| {
            note.handle(NoteCommand::CreateNote {
                id: note.id(),
                owner: owner.to_string(),
                text: text.to_string(),
                category: category.to_string(),
                subcategory: subcategory.to_string(),
            })
        };

        assert_eq!(create("", "x", "task", "notnow"), Err(ValidationError::EmptyOwner));
        assert_eq!(create("u", "  ", "task", "notnow"), Err(ValidationError::EmptyText));
        assert_eq!(
            create("u", "x", "chores", "notnow"),
            Err(ValidationError::UnknownCategory("chores".to_string()))
        );
        assert!(matches!(
            create("u", "x", "task", "later"),
            Err(ValidationError::UnknownSubcategory { .. })
        ));
    }

    #[test]
    fn commands_before_create_report_missing_note() {
        let note = NoteAggregate::new(Uuid::new_v4(), rules(wednesday()));
        assert_eq!(
            note.handle(NoteCommand::DeleteNote { id: note.id() }),
            Err(ValidationError::NoteNotFound(note.id()))
        );
    }

    #[test]
    fn create_twice_is_rejected() {
        let note = created_note("buy milk");
        let err = note
            .handle(NoteCommand::CreateNote {
                id: note.id(),
                owner: "u1".to_string(),
                text: "again".to_string(),
                category: "task".to_string(),
                subcategory: TASK_UNSCHEDULED.to_string(),
            })
            .unwrap_err();
        assert_eq!(err, ValidationError::NoteAlreadyExists(note.id()));
    }

    #[test]
    fn delete_and_undelete_alternate() {
        let mut note = created_note("buy milk");
        assert_eq!(
            note.handle(NoteCommand::UndeleteNote { id: note.id() }),
            Err(ValidationError::NotDeleted(note.id()))
        );
        note.apply(&DomainEvent::NoteDeleted);
        assert_eq!(
            note.handle(NoteCommand::DeleteNote { id: note.id() }),
            Err(ValidationError::AlreadyDeleted(note.id()))
        );
        assert_eq!(
            note.handle(NoteCommand::UndeleteNote { id: note.id() }),
            Ok(vec![DomainEvent::NoteUndeleted])
        );
    }

    #[test]
    fn update_text_stores_trimmed_text() {
        let note = created_note("buy milk");
        let events = note
            .handle(NoteCommand::UpdateNoteText {
                id: note.id(),
                text: "  buy oat milk ".to_string(),
            })
            .unwrap();
        assert_eq!(
            events,
            vec![DomainEvent::NoteTextUpdated(NoteTextUpdated {
                text: "buy oat milk".to_string()
            })]
        );
    }

    #[test]
    fn category_change_resets_to_inbox() {
        let note = created_note("buy milk");
        assert_eq!(
            note.handle(NoteCommand::SetNoteCategory {
                id: note.id(),
                category: " task ".to_string(),
            }),
            Err(ValidationError::SameCategory("task".to_string()))
        );

        let events = note
            .handle(NoteCommand::SetNoteCategory {
                id: note.id(),
                category: "reference".to_string(),
            })
            .unwrap();
        assert_eq!(
            events,
            vec![DomainEvent::NoteCategoryChanged(NoteCategoryChanged {
                category: "reference".to_string(),
                subcategory: "process".to_string(),
            })]
        );
    }

    #[test]
    fn scheduling_transition_sets_due_at_local_midnight() {
        let note = created_note("buy milk");
        let events = note
            .handle(NoteCommand::TransitionNoteSubcategory {
                id: note.id(),
                transition_event: "tomorrow".to_string(),
            })
            .unwrap();

        let local_midnight = tz().with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        assert_eq!(
            events,
            vec![
                DomainEvent::NoteSubcategoryChanged(NoteSubcategoryChanged {
                    subcategory: TASK_SCHEDULED.to_string(),
                }),
                DomainEvent::NoteDueChanged(NoteDueChanged {
                    due: local_midnight.with_timezone(&Utc) + Duration::days(2),
                }),
            ]
        );
    }

    #[test]
    fn leaving_a_due_date_without_new_one_clears_it() {
        let mut note = created_note("buy milk");
        for event in note
            .handle(NoteCommand::TransitionNoteSubcategory {
                id: note.id(),
                transition_event: "today".to_string(),
            })
            .unwrap()
        {
            note.apply(&event);
        }
        assert!(note.state().due.is_some());

        let events = note
            .handle(NoteCommand::TransitionNoteSubcategory {
                id: note.id(),
                transition_event: "done".to_string(),
            })
            .unwrap();
        assert_eq!(
            kinds(&events),
            vec![EventKind::NoteSubcategoryChanged, EventKind::NoteDueCleared]
        );
        assert!(matches!(
            &events[0],
            DomainEvent::NoteSubcategoryChanged(c) if c.subcategory == TASK_DONE
        ));
    }

    #[test]
    fn unknown_transition_is_rejected() {
        let note = created_note("buy milk");
        assert_eq!(
            note.handle(NoteCommand::TransitionNoteSubcategory {
                id: note.id(),
                transition_event: "teleport".to_string(),
            }),
            Err(ValidationError::UnknownTransition {
                subcategory: TASK_UNSCHEDULED.to_string(),
                event: "teleport".to_string(),
            })
        );
    }
}
