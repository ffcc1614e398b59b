use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, warn};

use crate::cache::{DatasetLoader, Provenance, SnapshotStore};
use crate::config::Config;
use crate::editor::{parse_assignment, FormValues, SaveAction, SaveClient, SaveOutcome, Selection};
use crate::error::SaveError;
use crate::sheet::{view, CategoryClass, CategoryFilter, Dataset, FieldKey, FieldMap, Row, Suggestions};
use crate::timing::Notice;
use crate::transport::Transport;

const ATTRIBUTE_TIP: &str = "Tip: attribute only applies to monsters, it will be cleared on save";

/// An open edit form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditSession {
  /// The record being edited; `None` for a new card
  pub selection: Option<Selection>,
  pub form: FormValues,
}

/// Everything the client knows at a given moment.
#[derive(Debug, Default)]
pub struct AppState {
  /// Active dataset, replaced wholesale on every load
  pub dataset: Dataset,
  /// Resolved from the active dataset's header
  pub fields: FieldMap,
  pub provenance: Provenance,
  pub suggestions: Suggestions,
  pub filter: CategoryFilter,
  pub query: String,
  pub editor: Option<EditSession>,
  /// Whether the connection is believed to be up
  pub online: bool,
}

/// Client controller: owns the state and routes operations to the loader and
/// the save client.
pub struct App<T, S> {
  loader: DatasetLoader<T, S>,
  saver: SaveClient<T>,
  state: AppState,
  notice: Notice,
}

impl<T: Transport + Clone, S: SnapshotStore> App<T, S> {
  pub fn new(transport: T, snapshots: S, config: &Config) -> Self {
    let budget = config.network.fetch_timeout();
    Self {
      loader: DatasetLoader::new(
        transport.clone(),
        snapshots,
        config.sheet.dataset_url.clone(),
        budget,
      ),
      saver: SaveClient::new(transport, config.sheet.write_url.clone(), budget),
      state: AppState {
        online: true,
        ..AppState::default()
      },
      notice: Notice::new(config.network.notice()),
    }
  }

  pub fn state(&self) -> &AppState {
    &self.state
  }

  pub fn notice(&self) -> Option<String> {
    self.notice.current()
  }

  pub fn status_line(&self) -> String {
    self.state.provenance.status_line()
  }

  /// Load the dataset and adopt whatever the loader settles on.
  pub async fn load(&mut self, force_refresh: bool) -> Provenance {
    let outcome = self.loader.load(force_refresh).await;

    match outcome.provenance {
      Provenance::Unavailable => {
        self.state.dataset = Dataset::empty();
        self.state.fields = FieldMap::default();
        self.state.suggestions = Suggestions::default();
      }
      _ => {
        self.state.fields = FieldMap::resolve(outcome.dataset.header());
        self.state.suggestions = Suggestions::hydrate(&outcome.dataset, &self.state.fields);
        self.state.dataset = outcome.dataset;

        let missing = self.state.fields.missing();
        if !missing.is_empty() {
          debug!(?missing, "columns not found in sheet header");
        }
      }
    }

    self.state.provenance = outcome.provenance;
    if outcome.provenance.is_live() {
      // A live read proves the connection is up
      self.state.online = true;
    } else {
      self.notice.post(self.status_line());
    }
    info!(status = %self.status_line(), "dataset adopted");
    outcome.provenance
  }

  /// Fails when the last load found neither the sheet nor a stored copy, so an
  /// empty listing can't be mistaken for an empty sheet.
  pub fn ensure_available(&self) -> Result<()> {
    if self.state.provenance == Provenance::Unavailable {
      return Err(eyre!(
        "No card data available: the sheet is unreachable and nothing is cached"
      ));
    }
    Ok(())
  }

  /// Records passing the current category filter and search query.
  pub fn view(&self) -> Vec<&Row> {
    view(
      &self.state.dataset,
      &self.state.fields,
      self.state.filter,
      &self.state.query,
    )
  }

  pub fn set_filter(&mut self, category: &str) {
    self.state.filter = CategoryFilter::parse(category);
  }

  pub fn set_query(&mut self, query: &str) {
    self.state.query = query.to_string();
  }

  /// Flag the connection as down or back up.
  pub fn set_online(&mut self, online: bool) {
    self.state.online = online;
  }

  /// Start a blank form for a new card.
  pub fn open_new(&mut self) {
    let mut form = FormValues::new();
    form.set(FieldKey::Category, CategoryClass::Monster.label());
    self.state.editor = Some(EditSession {
      selection: None,
      form,
    });
  }

  /// Open an existing card by identity.
  pub fn open_edit(&mut self, identity: &str) -> Result<()> {
    let (row_position, row) = self
      .state
      .dataset
      .find_by_identity(&self.state.fields, identity)
      .ok_or_else(|| eyre!("No card with id {:?}", identity))?;

    self.state.editor = Some(EditSession {
      form: FormValues::from_row(row, &self.state.fields),
      selection: Some(Selection {
        values: row.clone(),
        row_position: Some(row_position),
      }),
    });
    Ok(())
  }

  /// Turn the open card into a new one with the same values.
  pub fn duplicate(&mut self) -> Result<()> {
    match self.state.editor.as_mut() {
      Some(session) if session.selection.is_some() => {
        session.selection = None;
        self.notice.post("Duplicated, save to add a new card");
        Ok(())
      }
      _ => {
        self.notice.post("Select a card to duplicate first");
        Err(eyre!("Nothing selected to duplicate"))
      }
    }
  }

  pub fn close_editor(&mut self) {
    self.state.editor = None;
  }

  /// Change one field of the open form.
  pub fn set_field(&mut self, key: FieldKey, value: &str) -> Result<()> {
    let session = self
      .state
      .editor
      .as_mut()
      .ok_or_else(|| eyre!("Nothing is open for editing"))?;
    session.form.set(key, value);

    if key == FieldKey::Category
      && matches!(
        CategoryClass::classify(value),
        Some(CategoryClass::Spell | CategoryClass::Trap)
      )
      && !session.form.get(FieldKey::Attribute).trim().is_empty()
    {
      self.notice.post(ATTRIBUTE_TIP);
    }
    Ok(())
  }

  /// Apply `key=value` assignments to the open form, in order.
  pub fn apply_assignments<A: AsRef<str>>(&mut self, assignments: &[A]) -> Result<()> {
    for assignment in assignments {
      let (key, value) = parse_assignment(assignment.as_ref())?;
      self.set_field(key, value)?;
    }
    Ok(())
  }

  /// Save the open form, then reload so the list shows what the sheet holds.
  pub async fn save(&mut self) -> Result<SaveOutcome, SaveError> {
    let session = self.state.editor.as_ref().ok_or(SaveError::NoSession)?;

    if !self.state.online && !self.state.provenance.is_live() {
      self.notice.post("Offline, can't save right now");
      return Err(SaveError::Offline);
    }
    if self.state.fields.width() == 0 {
      return Err(SaveError::NoSchema);
    }

    let result = self
      .saver
      .save(&session.form, session.selection.as_ref(), &self.state.fields)
      .await;

    let outcome = match result {
      Ok(outcome) => outcome,
      Err(e) => {
        if e.is_local() {
          debug!("Save refused: {}", e);
        } else {
          warn!("Save failed: {}", e);
        }
        self.notice.post(e.to_string());
        return Err(e);
      }
    };

    let identity = session
      .selection
      .as_ref()
      .and_then(|s| s.identity(&self.state.fields))
      .map(String::from);

    self.notice.post(outcome.message.clone());
    self.load(true).await;

    match outcome.action {
      SaveAction::Add => self.close_editor(),
      SaveAction::Update => self.refresh_selection(identity.as_deref()),
    }
    Ok(outcome)
  }

  /// Point the open session at the reloaded copy of its record.
  fn refresh_selection(&mut self, identity: Option<&str>) {
    let Some(identity) = identity else {
      return;
    };
    let found = self
      .state
      .dataset
      .find_by_identity(&self.state.fields, identity)
      .map(|(position, row)| (position, row.clone()));

    if let (Some(session), Some((position, row))) = (self.state.editor.as_mut(), found) {
      session.selection = Some(Selection {
        values: row,
        row_position: Some(position),
      });
    }
  }
}
