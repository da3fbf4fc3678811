use chrono::Local;
use serde_json::Value;
use tempfile::TempDir;

use tidelog::filename::dated_file_name;
use tidelog::{Env, Level, LogOption, Manager};

fn manager_in(dir: &TempDir) -> Manager {
    Manager::new([
        LogOption::LogDir(dir.path().to_path_buf()),
        LogOption::DefaultName("svc".to_string()),
        LogOption::ErrorName("svc_error".to_string()),
    ])
}

fn read_today(dir: &TempDir, prefix: &str) -> Vec<Value> {
    let path = dir.path().join(dated_file_name(prefix, Local::now().date_naive()));
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn test_only_errors_reach_shared_file() {
    let temp_dir = TempDir::new().unwrap();
    let manager = manager_in(&temp_dir);

    let payments = manager.logger("payments");
    let orders = manager.logger("orders");
    payments.error("card declined");
    orders.info("order created");
    manager.sync("payments").unwrap();
    manager.sync("orders").unwrap();

    let errors = read_today(&temp_dir, "svc_error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["message"], "card declined");
    assert_eq!(errors[0]["logger"], "payments");

    let orders_lines = read_today(&temp_dir, "orders_info");
    assert_eq!(orders_lines.len(), 1);
    assert_eq!(orders_lines[0]["level"], "info");
}

#[test]
fn test_alias_points_at_current_file() {
    let temp_dir = TempDir::new().unwrap();
    let manager = manager_in(&temp_dir);
    manager.logger("orders").warn("low stock");
    manager.sync("orders").unwrap();

    let alias = temp_dir.path().join("orders_info.log");
    let content = std::fs::read_to_string(alias).unwrap();
    assert!(content.contains("low stock"));
}

#[test]
fn test_level_changes_reach_cached_loggers() {
    let temp_dir = TempDir::new().unwrap();
    let manager = manager_in(&temp_dir);
    let logger = manager.logger("orders");

    manager.set_level(Level::Error);
    logger.warn("suppressed");
    manager.set_level(Level::Debug);
    logger.debug("detail");
    manager.sync("orders").unwrap();

    let messages: Vec<Value> = read_today(&temp_dir, "orders_info")
        .into_iter()
        .map(|v| v["message"].clone())
        .collect();
    assert_eq!(messages, vec![Value::from("detail")]);
}

#[test]
fn test_set_log_switches_writer_generation() {
    let temp_dir = TempDir::new().unwrap();
    let manager = manager_in(&temp_dir);
    let before = manager.logger("orders");

    manager.set_log(Env::Warn, []);
    let after = manager.logger("orders");

    assert!(!before.ptr_eq(&after));
    assert_eq!(manager.level(), Level::Warn);
}
