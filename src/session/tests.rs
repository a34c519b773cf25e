use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tempfile::TempDir;

use super::*;
use crate::compiler::fake::FakeFactory;
use crate::config::TimeoutMs;
use crate::store::{MapLookup, StoreError};
use crate::utils::path::normalize_path;

pub(crate) struct Project {
    pub dir: TempDir,
    pub temp: TempDir,
    pub docs: Arc<RwLock<FxHashMap<PathBuf, String>>>,
}

impl Project {
    pub fn new() -> Self {
        let project = Self {
            dir: TempDir::new().unwrap(),
            temp: TempDir::new().unwrap(),
            docs: Arc::default(),
        };
        project.write("scss/main.scss", "@import 'vars';\nbody { color: $c; }\n");
        project.write("scss/other.scss", "@import 'vars';\n");
        project.write("scss/_vars.scss", "$c: red;\n");
        project
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        normalize_path(self.dir.path()).join(rel)
    }

    pub fn write(&self, rel: &str, text: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    pub fn config(&self, toml: &str) -> SassConfig {
        let mut config = SassConfig::parse(toml, &self.path("")).unwrap();
        config.sass.temp_dir = Some(self.temp.path().to_path_buf());
        config
    }

    pub fn session(&self) -> Arc<Session> {
        self.session_with(self.config(""))
    }

    pub fn session_with(&self, config: SassConfig) -> Arc<Session> {
        let docs: Arc<dyn DocumentSource> = self.docs.clone();
        Arc::new(Session::with_factory(config, FakeFactory::inliner(), docs))
    }
}

#[tokio::test]
async fn test_compile_publishes_persisted_map() {
    let project = Project::new();
    let session = project.session();
    let main = project.path("scss/main.scss");
    let css = project.path("scss/main.css");

    let result = session.compile(&main).await.unwrap().unwrap();
    assert_eq!(result.css_file(), css);
    assert!(css.is_file());

    let usage = session.store().get_usage(&project.path("scss/_vars.scss"));
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].css_file, css);
    assert_eq!(session.store().input_file(&css).await.unwrap(), main);
    assert_eq!(session.targets_for(&project.path("scss/_vars.scss")), vec![main]);
}

#[tokio::test]
async fn test_failed_compile_rejects_pending_map() {
    let project = Project::new();
    project.write("scss/main.scss", "@import 'missing';\n");
    let session = project.session();
    let css = project.path("scss/main.css");

    let errors = session
        .compile(&project.path("scss/main.scss"))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(!css.exists());

    let err = session.store().get(&css).resolve().await.unwrap_err();
    assert!(matches!(err, StoreError::Compile { .. }));
}

#[tokio::test]
async fn test_failed_recompile_keeps_previous_map() {
    let project = Project::new();
    let session = project.session();
    let main = project.path("scss/main.scss");
    let css = project.path("scss/main.css");

    session.compile(&main).await.unwrap().unwrap();
    project.write("scss/main.scss", "@import 'missing';\n");
    session.compile(&main).await.unwrap().unwrap_err();

    let MapLookup::Ready(map) = session.store().get(&css) else {
        panic!("previous map should stay in effect");
    };
    assert_eq!(map.local_sources.len(), 2);
}

#[tokio::test]
async fn test_partial_ticket_answered_by_entry_compile() {
    let project = Project::new();
    project.write("scss/_vars.scss", "$c: red;\n@import 'missing';\n");
    let session = project.session();
    let main = project.path("scss/main.scss");
    let vars = project.path("scss/_vars.scss");

    let main_ticket = session.get_errors(&main);
    let vars_ticket = session.get_errors(&vars);
    session.compile(&main).await.unwrap().unwrap_err();

    let main_result = main_ticket.wait().await;
    assert!(!main_result.aborted);
    assert_eq!(main_result.errors.len(), 1);
    assert_eq!(main_result.errors[0].pos.line, None);

    let vars_result = vars_ticket.wait().await;
    assert_eq!(vars_result.errors.len(), 1);
    assert_eq!(vars_result.errors[0].path, vars);
    assert_eq!(vars_result.errors[0].pos.line, Some(1));
}

#[tokio::test]
async fn test_scan_partial_previews_dependents() {
    let project = Project::new();
    let session = project.session();
    let main = project.path("scss/main.scss");
    let vars = project.path("scss/_vars.scss");
    session.compile(&main).await.unwrap().unwrap();

    let result = session.scan_file("$c: blue;\n@import 'missing';\n", &vars).await;
    assert!(!result.aborted);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].path, vars);
    assert_eq!(result.errors[0].pos.line, Some(1));
    assert_eq!(fs::read_to_string(&vars).unwrap(), "$c: red;\n");

    let clean = session.scan_file("$c: blue;\n", &vars).await;
    assert_eq!(clean, ScanResult::completed(Vec::new()));
    let MapLookup::Ready(map) = session.store().get(&project.path("scss/main.css")) else {
        panic!("preview map expected");
    };
    assert!(map.local_sources.contains(&vars));
}

#[tokio::test]
async fn test_scan_entry_and_orphan() {
    let project = Project::new();
    let session = project.session();

    let entry = session
        .scan_file("@import 'nope';\n", &project.path("scss/main.scss"))
        .await;
    assert_eq!(entry.errors.len(), 1);
    assert_eq!(entry.errors[0].pos.line, Some(0));

    // No map lists the partial yet.
    let orphan = session
        .scan_file("$c: red;\n", &project.path("scss/_vars.scss"))
        .await;
    assert_eq!(orphan, ScanResult::completed(Vec::new()));
}

#[tokio::test]
async fn test_disabled_is_skipped() {
    let project = Project::new();
    let session = project.session_with(project.config("[sass]\nenabled = false\n"));

    assert!(session.compile(&project.path("scss/main.scss")).await.is_none());
    assert!(session.compile(&project.path("readme.md")).await.is_none());
    assert!(!project.path("scss/main.css").exists());
}

#[tokio::test]
async fn test_reload_preferences() {
    let project = Project::new();
    let config_file = project.path("sassmap.toml");
    fs::write(&config_file, "[sass]\ntimeout = 10000\n").unwrap();
    let mut config = SassConfig::load(&config_file).unwrap();
    config.sass.temp_dir = Some(project.temp.path().to_path_buf());
    let session = project.session_with(config);

    assert!(!session.reload_preferences().await.unwrap());

    fs::write(&config_file, "[sass]\ntimeout = 50\n").unwrap();
    assert!(session.reload_preferences().await.unwrap());
    assert_eq!(session.prefs().get().sass.timeout, TimeoutMs(50));

    fs::write(&config_file, "[sass]\nworker = []\n").unwrap();
    assert!(session.reload_preferences().await.is_err());
    assert_eq!(session.prefs().get().sass.timeout, TimeoutMs(50));
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let project = Project::new();
    let session = project.session();
    let main = project.path("scss/main.scss");

    let mut overrides = FxHashMap::default();
    overrides.insert(project.path("scss/_vars.scss"), "$c: blue;\n".to_string());
    session.preview(&main, &overrides).await.unwrap().unwrap();
    let slot = crate::render::slot_for(&session.pipeline().temp_root(), &main);
    assert!(slot.exists());

    let ticket = session.get_errors(Path::new("/elsewhere/x.scss"));
    session.shutdown().await;

    assert!(ticket.wait().await.aborted);
    assert!(!slot.exists());
    assert!(matches!(
        session.store().get(&project.path("scss/main.css")),
        MapLookup::Missing(_)
    ));
}

#[tokio::test]
async fn test_discover_loads_existing_maps() {
    let project = Project::new();
    project.write(
        "scss/main.css",
        "body{}\n/*# sourceMappingURL=main.css.map */\n",
    );
    project.write(
        "scss/main.css.map",
        r#"{"version":3,"sources":["main.scss","_vars.scss"],"names":[],"mappings":"AAAA"}"#,
    );
    let session = project.session();

    assert_eq!(session.discover(&project.path("")), 1);
    assert_eq!(
        session.targets_for(&project.path("scss/_vars.scss")),
        vec![project.path("scss/main.scss")]
    );
}

#[tokio::test]
async fn test_discard_preview_restores_saved_map() {
    let project = Project::new();
    let session = project.session();
    let main = project.path("scss/main.scss");
    let vars = project.path("scss/_vars.scss");
    let css = project.path("scss/main.css");
    session.compile(&main).await.unwrap().unwrap();
    let MapLookup::Ready(saved) = session.store().get(&css) else {
        panic!("saved map expected");
    };

    let mut overrides = FxHashMap::default();
    overrides.insert(vars.clone(), "$c: blue;\n".to_string());
    session.preview(&main, &overrides).await.unwrap().unwrap();
    let MapLookup::Ready(preview) = session.store().get(&css) else {
        panic!("preview map expected");
    };
    assert!(!Arc::ptr_eq(&saved, &preview));

    session.discard_preview(&vars);
    let MapLookup::Ready(current) = session.store().get(&css) else {
        panic!("saved map expected");
    };
    assert!(Arc::ptr_eq(&saved, &current));
}
