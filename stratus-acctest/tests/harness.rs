use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use regex::Regex;
use stratus_acctest::backend::{InMemoryBackend, LocalBackend, StateBackend};
use stratus_acctest::lock::Command;
use stratus_acctest::{
    AccTestError, Outcome, TestCase, TestStep, check_fn, check_resource_attr, run,
};
use stratus_core::provider::{BoxFuture, Provider, ProviderError, ProviderResult, ResourceType};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::schema::{AttributeSchema, AttributeType, ResourceSchema};

struct Thing;

impl ResourceType for Thing {
    fn name(&self) -> &'static str {
        "thing"
    }

    fn schema(&self) -> ResourceSchema {
        ResourceSchema::new("thing")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(AttributeSchema::new("size", AttributeType::Int).force_new())
            .attribute(AttributeSchema::new("secret", AttributeType::String).write_only())
            .attribute(AttributeSchema::new("hint", AttributeType::String).computed())
    }
}

/// Provider keeping things in a map
#[derive(Default)]
struct Things {
    objects: Mutex<HashMap<String, HashMap<String, Value>>>,
    next: AtomicU32,
    creates: AtomicU32,
    /// Reads return `name` upper-cased
    shout: bool,
    /// Create returns a `hint` later reads never do
    hint_on_create: bool,
    /// Create returns `name` upper-cased; reads return it as stored
    shout_on_create: bool,
    refuse_delete: AtomicBool,
}

impl Things {
    fn shouting() -> Self {
        Self {
            shout: true,
            ..Self::default()
        }
    }

    fn hinting() -> Self {
        Self {
            hint_on_create: true,
            ..Self::default()
        }
    }

    fn shouting_on_create() -> Self {
        Self {
            shout_on_create: true,
            ..Self::default()
        }
    }

    fn count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn creates(&self) -> u32 {
        self.creates.load(Ordering::SeqCst)
    }

    /// Change an attribute behind the harness's back
    fn tamper(&self, key: &str, value: Value) {
        for attrs in self.objects.lock().unwrap().values_mut() {
            attrs.insert(key.to_string(), value.clone());
        }
    }

    fn view(&self, mut attrs: HashMap<String, Value>) -> HashMap<String, Value> {
        if self.shout
            && let Some(Value::String(name)) = attrs.get_mut("name")
        {
            *name = name.to_uppercase();
        }
        attrs
    }

    fn store(&self, identifier: &str, resource: &Resource) -> HashMap<String, Value> {
        let mut attrs = resource.attributes.clone();
        attrs.remove("secret");
        self.objects
            .lock()
            .unwrap()
            .insert(identifier.to_string(), attrs.clone());
        self.view(attrs)
    }
}

impl Provider for Things {
    fn name(&self) -> &'static str {
        "things"
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        vec![Box::new(Thing)]
    }

    fn read(&self, id: &ResourceId, identifier: Option<&str>) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let found = identifier.and_then(|i| {
            let attrs = self.objects.lock().unwrap().get(i).cloned();
            attrs.map(|attrs| (i.to_string(), self.view(attrs)))
        });
        Box::pin(async move {
            Ok(match found {
                Some((identifier, attrs)) => State::existing(id, attrs).with_identifier(identifier),
                None => State::not_found(id),
            })
        })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let identifier = format!("thing-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1);
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut attrs = self.store(&identifier, resource);
        if self.hint_on_create {
            attrs.insert("hint".to_string(), Value::string("fresh"));
        }
        if self.shout_on_create
            && let Some(Value::String(name)) = attrs.get_mut("name")
        {
            *name = name.to_uppercase();
        }
        let state = State::existing(resource.id.clone(), attrs).with_identifier(identifier);
        Box::pin(async move { Ok(state) })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        _from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let attrs = self.store(identifier, to);
        let state = State::existing(id.clone(), attrs).with_identifier(identifier);
        Box::pin(async move { Ok(state) })
    }

    fn delete(&self, id: &ResourceId, identifier: &str, _state: &State) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        if self.refuse_delete.load(Ordering::SeqCst) {
            return Box::pin(async move { Err(ProviderError::new("delete refused").for_resource(id)) });
        }
        let removed = self.objects.lock().unwrap().remove(identifier);
        Box::pin(async move {
            match removed {
                Some(_) => Ok(()),
                None => Err(ProviderError::not_found("no such thing").for_resource(id)),
            }
        })
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn thing(binding: &str, name: &str) -> Resource {
    Resource::new("thing", binding).with_attribute("name", Value::string(name))
}

#[tokio::test]
async fn converges_and_destroys() {
    init_logger();
    let things = Arc::new(Things::default());

    let case = TestCase::new(things.clone())
        .unit_test()
        .step(
            TestStep::config(vec![thing("a", "alpha").with_attribute("secret", Value::string("s3cr3t"))])
                .with_check(check_resource_attr("thing.a", "secret", "s3cr3t")),
        )
        .step(TestStep::config(vec![thing("a", "beta")]).with_check(check_resource_attr("thing.a", "name", "beta")))
        .step(TestStep::refresh().with_check(check_resource_attr("thing.a", "id", "thing-1")));

    assert_eq!(run(case).await.unwrap(), Outcome::Passed);
    assert_eq!(things.creates(), 1);
    assert_eq!(things.count(), 0);
}

#[tokio::test]
async fn perpetual_diff_fails_the_step() {
    init_logger();
    let things = Arc::new(Things::shouting());

    let case = TestCase::new(things.clone())
        .unit_test()
        .step(TestStep::config(vec![thing("a", "quiet")]));

    let err = run(case).await.unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Step 1/1 error"), "{}", message);
    assert!(message.contains("After applying this test step, the plan was not empty."), "{}", message);
    assert!(message.contains("thing.a"), "{}", message);
    assert_eq!(things.count(), 0);
}

#[tokio::test]
async fn expected_non_empty_plan() {
    init_logger();
    let case = TestCase::new(Arc::new(Things::shouting()))
        .unit_test()
        .step(TestStep::config(vec![thing("a", "quiet")]).expect_non_empty_plan());
    assert_eq!(run(case).await.unwrap(), Outcome::Passed);

    let case = TestCase::new(Arc::new(Things::default()))
        .unit_test()
        .step(TestStep::config(vec![thing("a", "quiet")]).expect_non_empty_plan());
    let err = run(case).await.unwrap_err();
    assert!(err.to_string().contains("Expected a non-empty plan"), "{}", err);
}

#[tokio::test]
async fn expected_non_empty_plan_needs_a_refreshed_diff() {
    init_logger();
    let things = Arc::new(Things::shouting_on_create());
    let case = TestCase::new(things.clone())
        .unit_test()
        .step(TestStep::config(vec![thing("a", "quiet")]).expect_non_empty_plan());

    let err = run(case).await.unwrap_err();
    assert!(
        matches!(err, AccTestError::Step { ref source, .. } if matches!(**source, AccTestError::EmptyPlan)),
        "{}",
        err
    );
    assert_eq!(things.count(), 0);
}

#[tokio::test]
async fn plan_only_step_reports_pending_changes() {
    init_logger();
    let things = Arc::new(Things::default());
    let case = TestCase::new(things.clone())
        .unit_test()
        .step(TestStep::config(vec![thing("a", "a")]))
        .step(
            TestStep::config(vec![thing("a", "a"), thing("b", "b")])
                .plan_only()
                .expect_non_empty_plan(),
        );

    assert_eq!(run(case).await.unwrap(), Outcome::Passed);
    assert_eq!(things.creates(), 1);
}

#[tokio::test]
async fn expect_error_must_match() {
    init_logger();
    let invalid = || vec![Resource::new("thing", "a")];

    let case = TestCase::new(Arc::new(Things::default()))
        .unit_test()
        .step(TestStep::config(invalid()).expect_error(Regex::new("name").unwrap()));
    assert_eq!(run(case).await.unwrap(), Outcome::Passed);

    let case = TestCase::new(Arc::new(Things::default()))
        .unit_test()
        .step(TestStep::config(invalid()).expect_error(Regex::new("^quota exceeded$").unwrap()));
    let err = run(case).await.unwrap_err();
    assert!(matches!(
        err,
        AccTestError::Step { ref source, .. } if matches!(**source, AccTestError::UnexpectedError { .. })
    ));

    let case = TestCase::new(Arc::new(Things::default()))
        .unit_test()
        .step(TestStep::config(vec![thing("a", "a")]).expect_error(Regex::new("anything").unwrap()));
    let err = run(case).await.unwrap_err();
    assert!(err.to_string().contains("Expected an error matching anything, but got none"), "{}", err);
}

#[tokio::test]
async fn error_check_can_swallow_errors() {
    init_logger();
    let case = TestCase::new(Arc::new(Things::shouting()))
        .unit_test()
        .with_error_check(|e| match e {
            AccTestError::NonEmptyPlan { .. } => None,
            other => Some(other),
        })
        .step(TestStep::config(vec![thing("a", "quiet")]));

    assert_eq!(run(case).await.unwrap(), Outcome::Passed);
}

#[tokio::test]
async fn taint_forces_replacement() {
    init_logger();
    let things = Arc::new(Things::default());
    let case = TestCase::new(things.clone())
        .unit_test()
        .step(TestStep::config(vec![thing("a", "a")]))
        .step(
            TestStep::config(vec![thing("a", "a")])
                .with_taint(&["thing.a"])
                .with_check(check_resource_attr("thing.a", "id", "thing-2")),
        );

    assert_eq!(run(case).await.unwrap(), Outcome::Passed);
    assert_eq!(things.creates(), 2);
}

#[tokio::test]
async fn import_verify_reports_differences() {
    init_logger();
    let things = Arc::new(Things::default());
    let tamper = things.clone();

    let case = TestCase::new(things.clone())
        .unit_test()
        .step(TestStep::config(vec![
            thing("a", "a").with_attribute("secret", Value::string("hidden")),
        ]))
        .step(TestStep::import("thing.a").verify(&[]))
        .step(
            TestStep::import("thing.a")
                .with_pre_config(move || tamper.tamper("name", Value::string("changed")))
                .verify(&[]),
        );

    let err = run(case).await.unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("Step 3/3 error"), "{}", message);
    assert!(message.contains("name: \"changed\" => \"a\""), "{}", message);
    assert!(!message.contains("secret"), "{}", message);
    assert_eq!(things.count(), 0);
}

#[tokio::test]
async fn import_id_sources() {
    init_logger();
    let things = Arc::new(Things::default());

    let case = TestCase::new(things.clone())
        .unit_test()
        .step(TestStep::config(vec![thing("a", "a")]))
        .step(TestStep::import("thing.a").with_import_id("thing-1").verify(&[]))
        .step(
            TestStep::import("thing.a")
                .with_import_id_prefix("thing-")
                .with_import_id_func(|state| {
                    state
                        .find_address("thing.a")
                        .and_then(|r| r.identifier.as_deref())
                        .and_then(|id| id.strip_prefix("thing-"))
                        .map(String::from)
                        .ok_or_else(|| "thing.a has no identifier".to_string())
                })
                .with_import_check(|state| match state.get_str("name") {
                    Some("a") => Ok(()),
                    other => Err(format!("unexpected name {:?}", other)),
                }),
        )
        .step(
            TestStep::import("thing.b")
                .with_import_id("thing-404")
                .expect_error(Regex::new("Cannot import non-existent remote object").unwrap()),
        );

    assert_eq!(run(case).await.unwrap(), Outcome::Passed);
}

#[tokio::test]
async fn id_only_refresh() {
    init_logger();
    let case = TestCase::new(Arc::new(Things::hinting()))
        .unit_test()
        .with_id_refresh("thing.a", &[])
        .step(TestStep::config(vec![thing("a", "a")]));
    let err = run(case).await.unwrap_err();
    assert!(matches!(
        err,
        AccTestError::Step { ref source, .. } if matches!(**source, AccTestError::IdRefresh { .. })
    ));
    assert!(err.to_string().contains("hint"), "{}", err);

    let case = TestCase::new(Arc::new(Things::hinting()))
        .unit_test()
        .with_id_refresh("thing.a", &["hint"])
        .step(TestStep::config(vec![thing("a", "a")]));
    assert_eq!(run(case).await.unwrap(), Outcome::Passed);
}

#[tokio::test]
async fn destroy_runs_after_a_failed_step() {
    init_logger();
    let things = Arc::new(Things::default());

    let case = TestCase::new(things.clone())
        .unit_test()
        .step(TestStep::config(vec![thing("a", "a"), thing("b", "b")]))
        .step(TestStep::config(vec![Resource::new("gadget", "g")]));

    let err = run(case).await.unwrap_err();
    assert!(err.to_string().contains("gadget.g: unsupported resource type"), "{}", err);
    assert_eq!(things.count(), 0);
}

#[tokio::test]
async fn destroy_failure_is_reported_with_the_step_error() {
    init_logger();
    let things = Arc::new(Things::default());
    let refuse = things.clone();

    let case = TestCase::new(things.clone())
        .unit_test()
        .step(TestStep::config(vec![thing("a", "a")]))
        .step(
            TestStep::config(vec![thing("a", "a")])
                .with_pre_config(move || refuse.refuse_delete.store(true, Ordering::SeqCst))
                .with_check(check_fn(|_| Err("boom".to_string()))),
        );

    let err = run(case).await.unwrap_err();
    let AccTestError::Multiple(errors) = &err else {
        panic!("expected both errors, got {}", err);
    };
    assert_eq!(errors.len(), 2);
    let message = err.to_string();
    assert!(message.contains("Step 2/2 error: Check failed: boom"), "{}", message);
    assert!(message.contains("Error running post-test destroy"), "{}", message);
    assert!(message.contains("delete refused"), "{}", message);
    assert_eq!(things.count(), 1);
}

#[tokio::test]
async fn check_destroy_sees_the_state_before_destroy() {
    init_logger();
    let case = TestCase::new(Arc::new(Things::default()))
        .unit_test()
        .with_check_destroy(check_fn(|ctx| {
            ctx.attributes("thing.a").map(|_| ())
        }))
        .step(TestStep::config(vec![thing("a", "a")]));
    assert_eq!(run(case).await.unwrap(), Outcome::Passed);

    let case = TestCase::new(Arc::new(Things::default()))
        .unit_test()
        .with_check_destroy(check_fn(|_| Err("still there".to_string())))
        .step(TestStep::config(vec![thing("a", "a")]));
    let err = run(case).await.unwrap_err();
    assert!(matches!(err, AccTestError::CheckDestroy(_)), "{}", err);
}

#[tokio::test]
async fn held_lock_blocks_the_case() {
    init_logger();
    let backend = Arc::new(InMemoryBackend::new());
    let held = backend.acquire_lock(Command::Apply).await.unwrap();
    let things = Arc::new(Things::default());

    let case = TestCase::new(things.clone())
        .unit_test()
        .with_backend(backend.clone())
        .step(TestStep::config(vec![thing("a", "a")]));

    let err = run(case).await.unwrap_err();
    assert!(err.to_string().contains("State is locked"), "{}", err);
    assert_eq!(things.creates(), 0);

    backend.release_lock(&held).await.unwrap();
}

#[tokio::test]
async fn local_backend_keeps_state_on_disk() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(LocalBackend::in_dir(dir.path()));

    let case = TestCase::new(Arc::new(Things::default()))
        .unit_test()
        .with_backend(backend.clone())
        .step(TestStep::config(vec![thing("a", "a")]))
        .step(TestStep::refresh().with_check(check_resource_attr("thing.a", "name", "a")));

    assert_eq!(run(case).await.unwrap(), Outcome::Passed);
    let state = backend.read_state().await.unwrap().unwrap();
    assert!(state.serial > 0);
    assert_eq!(state.managed_resources().count(), 0);
    assert!(backend.state_path().exists());
}

#[tokio::test]
async fn skipping() {
    init_logger();
    let things = Arc::new(Things::default());

    let case = TestCase::new(things.clone())
        .unit_test()
        .step(TestStep::config(vec![thing("a", "a")]).with_skip(|| Ok(true)))
        .step(TestStep::config(vec![thing("b", "b")]).with_check(check_fn(|ctx| {
            match ctx.attributes("thing.a") {
                Ok(_) => Err("thing.a should have been skipped".to_string()),
                Err(_) => Ok(()),
            }
        })));
    assert_eq!(run(case).await.unwrap(), Outcome::Passed);
    assert_eq!(things.creates(), 1);

    if !stratus_acctest::runner::acceptance_enabled() {
        let case = TestCase::new(things.clone()).step(TestStep::config(vec![thing("c", "c")]));
        assert!(matches!(run(case).await.unwrap(), Outcome::Skipped(_)));
        assert_eq!(things.creates(), 1);
    }
}

#[tokio::test]
async fn invalid_cases_and_failed_pre_checks_do_nothing() {
    init_logger();
    let things = Arc::new(Things::default());

    let err = run(TestCase::new(things.clone()).unit_test()).await.unwrap_err();
    assert!(matches!(err, AccTestError::Validation(_)));

    let case = TestCase::new(things.clone())
        .unit_test()
        .with_pre_check(|| Err("THING_TOKEN must be set".to_string()))
        .step(TestStep::config(vec![thing("a", "a")]));
    let err = run(case).await.unwrap_err();
    assert!(matches!(err, AccTestError::PreCheck(_)));
    assert_eq!(things.creates(), 0);
}
