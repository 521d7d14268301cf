//! Read-only view of the employee directory, which is owned elsewhere.

use std::io;
use std::path::Path;

use async_trait::async_trait;

use crate::engine::ScheduleError;
use crate::model::Employee;

#[async_trait]
pub trait EmployeeDirectory: Send + Sync {
    /// Employees ordered for display in pickers.
    async fn list_employees(&self) -> Result<Vec<Employee>, ScheduleError>;
}

/// Directory loaded once at startup.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    employees: Vec<Employee>,
}

impl StaticDirectory {
    pub fn new(mut employees: Vec<Employee>) -> Self {
        employees.sort_by(|a, b| sort_key(a).cmp(sort_key(b)));
        Self { employees }
    }

    /// JSON array of `{ "id", "displayName", "role" }`.
    pub fn from_json_file(path: &Path) -> io::Result<Self> {
        let bytes = std::fs::read(path)?;
        let employees: Vec<Employee> = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(Self::new(employees))
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }
}

fn sort_key(e: &Employee) -> &str {
    e.display_name.as_deref().unwrap_or(&e.id)
}

#[async_trait]
impl EmployeeDirectory for StaticDirectory {
    async fn list_employees(&self) -> Result<Vec<Employee>, ScheduleError> {
        Ok(self.employees.clone())
    }
}

/// First word of the display name, else the local part of the id.
pub fn short_name(employee_id: &str, employee: Option<&Employee>) -> String {
    if let Some(first) = employee
        .and_then(|e| e.display_name.as_deref())
        .and_then(|n| n.split_whitespace().next())
    {
        return first.to_string();
    }
    match employee_id.split('@').next() {
        Some(local) if !local.is_empty() => local.to_string(),
        _ => "Employee".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee(id: &str, name: Option<&str>) -> Employee {
        Employee {
            id: id.into(),
            display_name: name.map(Into::into),
            role: None,
        }
    }

    #[tokio::test]
    async fn listed_by_display_name() {
        let dir = StaticDirectory::new(vec![
            employee("zoe@x.com", Some("Zoe Park")),
            employee("bob@x.com", Some("Bob Stone")),
            employee("carl@x.com", None),
        ]);
        let ids: Vec<String> = dir
            .list_employees()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["bob@x.com", "zoe@x.com", "carl@x.com"]);
    }

    #[test]
    fn short_names() {
        let bob = employee("bob@x.com", Some("Bob Stone"));
        assert_eq!(short_name("bob@x.com", Some(&bob)), "Bob");
        assert_eq!(short_name("ana@x.com", None), "ana");
        assert_eq!(short_name("@x.com", None), "Employee");
        let unnamed = employee("carl@x.com", Some("   "));
        assert_eq!(short_name("carl@x.com", Some(&unnamed)), "carl");
    }

    #[test]
    fn loads_json_file() {
        let dir = std::env::temp_dir().join("shiftd_test_directory");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("employees.json");
        std::fs::write(
            &path,
            r#"[{"id":"bob@x.com","displayName":"Bob Stone","role":"cashier"}]"#,
        )
        .unwrap();
        let loaded = StaticDirectory::from_json_file(&path).unwrap();
        assert_eq!(loaded.len(), 1);

        std::fs::write(&path, "not json").unwrap();
        assert!(StaticDirectory::from_json_file(&path).is_err());
    }
}
