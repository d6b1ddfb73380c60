use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::common::config::BootstrapEmployee;
use crate::common::error::{KioskError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub pin: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct EmployeeFile {
    #[serde(default)]
    employees: Vec<Employee>,
}

pub fn is_valid_pin(pin: &str) -> bool {
    pin.len() == 4 && pin.bytes().all(|b| b.is_ascii_digit())
}

/// Ids name the employee's crop directory and descriptor file, so they must
/// be a single plain path component.
pub fn is_valid_id(id: &str) -> bool {
    !id.trim().is_empty()
        && id != "."
        && id != ".."
        && !id.chars().any(|c| matches!(c, '/' | '\\' | '\0') || c.is_control())
}

/// Indexed view of the registry file at one point in time.
#[derive(Debug, Default)]
pub struct Roster {
    employees: Vec<Employee>,
    by_id: HashMap<String, usize>,
    by_pin: HashMap<String, usize>,
}

impl Roster {
    fn build(file: EmployeeFile) -> Self {
        let mut roster = Roster::default();
        for employee in file.employees {
            if !is_valid_id(&employee.id) {
                tracing::warn!(employee_id = ?employee.id, "unusable employee id in registry, skipping");
                continue;
            }
            if roster.by_id.contains_key(&employee.id) {
                tracing::warn!(employee_id = %employee.id, "duplicate employee id in registry, keeping first");
                continue;
            }
            if roster.by_pin.contains_key(&employee.pin) {
                tracing::warn!(employee_id = %employee.id, "duplicate PIN in registry, keeping first");
                continue;
            }
            if !is_valid_pin(&employee.pin) {
                tracing::warn!(employee_id = %employee.id, "malformed PIN in registry, entry not reachable by PIN");
            } else {
                roster.by_pin.insert(employee.pin.clone(), roster.employees.len());
            }
            roster.by_id.insert(employee.id.clone(), roster.employees.len());
            roster.employees.push(employee);
        }
        roster
    }

    pub fn by_id(&self, id: &str) -> Option<&Employee> {
        self.by_id.get(id).map(|&i| &self.employees[i])
    }

    pub fn by_pin(&self, pin: &str) -> Option<&Employee> {
        self.by_pin.get(pin).map(|&i| &self.employees[i])
    }

    pub fn all(&self) -> &[Employee] {
        &self.employees
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }
}

/// Modification time and length of the backing file.
type SourceVersion = Option<(SystemTime, u64)>;

struct CachedRoster {
    source_version: SourceVersion,
    roster: Arc<Roster>,
}

/// Employee records backed by a JSON file.
///
/// Reads go through a cache keyed on the file's version; writers through
/// [`EmployeeRegistry::add`] invalidate it so the next read reloads.
pub struct EmployeeRegistry {
    path: PathBuf,
    cache: RwLock<Option<CachedRoster>>,
}

impl EmployeeRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn source_version(&self) -> SourceVersion {
        let meta = fs::metadata(&self.path).ok()?;
        Some((meta.modified().ok()?, meta.len()))
    }

    /// Current roster, reloaded if the file changed since the last read.
    pub fn snapshot(&self) -> Arc<Roster> {
        let version = self.source_version();
        if let Some(cached) = self.cache.read().as_ref() {
            if cached.source_version == version {
                return cached.roster.clone();
            }
        }
        self.refresh(version)
    }

    fn refresh(&self, version: SourceVersion) -> Arc<Roster> {
        let mut cache = self.cache.write();
        if let Some(cached) = cache.as_ref() {
            if cached.source_version == version {
                return cached.roster.clone();
            }
        }

        let roster = match self.read_file() {
            Ok(file) => Arc::new(Roster::build(file)),
            Err(e) => {
                tracing::warn!("Failed to load registry {}: {}", self.path.display(), e);
                // Keep serving the last good roster over an unreadable file.
                match cache.as_ref() {
                    Some(cached) => cached.roster.clone(),
                    None => Arc::new(Roster::default()),
                }
            }
        };

        tracing::debug!("Registry loaded: {} employees", roster.len());
        *cache = Some(CachedRoster {
            source_version: version,
            roster: roster.clone(),
        });
        roster
    }

    fn read_file(&self) -> Result<EmployeeFile> {
        if !self.path.exists() {
            return Ok(EmployeeFile::default());
        }
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn invalidate(&self) {
        *self.cache.write() = None;
    }

    pub fn by_pin(&self, pin: &str) -> Option<Employee> {
        self.snapshot().by_pin(pin).cloned()
    }

    pub fn by_id(&self, id: &str) -> Option<Employee> {
        self.snapshot().by_id(id).cloned()
    }

    pub fn all(&self) -> Vec<Employee> {
        self.snapshot().all().to_vec()
    }

    /// Appends an employee. Ids and PINs must be unique and PINs 4 digits.
    pub fn add(&self, employee: Employee) -> Result<()> {
        if !is_valid_pin(&employee.pin) {
            return Err(KioskError::Registry(format!(
                "PIN for {} must be exactly 4 digits", employee.id
            )));
        }
        if !is_valid_id(&employee.id) {
            return Err(KioskError::Registry(format!(
                "Employee id {:?} must be a non-empty name without path separators", employee.id
            )));
        }

        let mut file = self.read_file()?;
        if file.employees.iter().any(|e| e.id == employee.id) {
            return Err(KioskError::Registry(format!(
                "Employee id {} already exists", employee.id
            )));
        }
        if file.employees.iter().any(|e| e.pin == employee.pin) {
            return Err(KioskError::Registry(format!(
                "PIN already assigned to another employee ({})", employee.id
            )));
        }

        tracing::info!(employee_id = %employee.id, "registry_add");
        file.employees.push(employee);
        self.write_file(&file)?;
        self.invalidate();
        Ok(())
    }

    fn write_file(&self, file: &EmployeeFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(file)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Seeds the bootstrap employee if its id is absent. Returns whether it was added.
    pub fn ensure_bootstrap(&self, bootstrap: &BootstrapEmployee) -> Result<bool> {
        if self.by_id(&bootstrap.id).is_some() {
            return Ok(false);
        }
        self.add(Employee {
            id: bootstrap.id.clone(),
            name: bootstrap.name.clone(),
            pin: bootstrap.pin.clone(),
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee(id: &str, pin: &str) -> Employee {
        Employee {
            id: id.to_string(),
            name: format!("Employee {}", id),
            pin: pin.to_string(),
        }
    }

    #[test]
    fn test_pin_validation() {
        assert!(is_valid_pin("0420"));
        assert!(!is_valid_pin("420"));
        assert!(!is_valid_pin("04a0"));
        assert!(!is_valid_pin("04200"));
    }

    #[test]
    fn test_add_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EmployeeRegistry::new(dir.path().join("employees.json"));

        registry.add(employee("7", "1234")).unwrap();
        assert!(matches!(registry.add(employee("7", "9999")), Err(KioskError::Registry(_))));
        assert!(matches!(registry.add(employee("8", "1234")), Err(KioskError::Registry(_))));
        assert!(registry.add(employee("9", "12x4")).is_err());

        assert_eq!(registry.all().len(), 1);
        assert_eq!(registry.by_pin("1234").unwrap().id, "7");
    }

    #[test]
    fn test_id_validation() {
        assert!(is_valid_id("7"));
        assert!(is_valid_id("emp-01.a"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("  "));
        assert!(!is_valid_id("."));
        assert!(!is_valid_id(".."));
        assert!(!is_valid_id("../etc"));
        assert!(!is_valid_id("a/b"));
        assert!(!is_valid_id("a\\b"));
        assert!(!is_valid_id("a\nb"));
    }

    #[test]
    fn test_path_like_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EmployeeRegistry::new(dir.path().join("employees.json"));
        assert!(matches!(registry.add(employee("../../tmp/x", "1234")), Err(KioskError::Registry(_))));
        assert!(matches!(registry.add(employee("..", "1235")), Err(KioskError::Registry(_))));
        assert!(registry.all().is_empty());
    }

    #[test]
    fn test_path_like_ids_in_file_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("employees.json");
        fs::write(
            &path,
            r#"{"employees":[{"id":"../x","name":"A","pin":"1111"},{"id":"2","name":"B","pin":"2222"}]}"#,
        )
        .unwrap();
        let registry = EmployeeRegistry::new(&path);
        assert!(registry.by_pin("1111").is_none());
        assert!(registry.by_id("../x").is_none());
        assert_eq!(registry.by_id("2").unwrap().name, "B");
    }

    #[test]
    fn test_add_invalidates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EmployeeRegistry::new(dir.path().join("employees.json"));
        assert!(registry.snapshot().is_empty());

        registry.add(employee("1", "0000")).unwrap();
        assert_eq!(registry.by_id("1").unwrap().pin, "0000");
    }

    #[test]
    fn test_external_edit_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("employees.json");
        fs::write(&path, r#"{"employees":[{"id":"1","name":"A","pin":"1111"}]}"#).unwrap();
        let registry = EmployeeRegistry::new(&path);
        assert_eq!(registry.snapshot().len(), 1);

        fs::write(
            &path,
            r#"{"employees":[{"id":"1","name":"A","pin":"1111"},{"id":"2","name":"B","pin":"2222"}]}"#,
        )
        .unwrap();
        assert_eq!(registry.by_pin("2222").unwrap().name, "B");
    }

    #[test]
    fn test_duplicate_entries_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("employees.json");
        fs::write(
            &path,
            r#"{"employees":[{"id":"1","name":"A","pin":"1111"},{"id":"2","name":"B","pin":"1111"}]}"#,
        )
        .unwrap();
        let registry = EmployeeRegistry::new(&path);
        assert_eq!(registry.by_pin("1111").unwrap().id, "1");
        assert!(registry.by_id("2").is_none());
    }

    #[test]
    fn test_bootstrap_seeded_once() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EmployeeRegistry::new(dir.path().join("employees.json"));
        let boot = BootstrapEmployee {
            id: "1".to_string(),
            name: "Test Employee".to_string(),
            pin: "0000".to_string(),
        };
        assert!(registry.ensure_bootstrap(&boot).unwrap());
        assert!(!registry.ensure_bootstrap(&boot).unwrap());
        assert_eq!(registry.all().len(), 1);
    }
}
