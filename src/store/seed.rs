use serde_json::json;
use tracing::info;

use super::{ModuleStore, StoreError};
use crate::schema::{FieldType, ModuleField, RowValues};

/// Employee and salary sample modules
pub fn demo_modules() -> Vec<(&'static str, Vec<ModuleField>, Vec<serde_json::Value>)> {
    vec![
        (
            "员工管理",
            vec![
                ModuleField::new("姓名", "name", FieldType::String).required(),
                ModuleField::new("部门", "dept", FieldType::Select)
                    .required()
                    .with_options(&["技术部", "市场部", "人事部", "财务部"]),
                ModuleField::new("入职日期", "joinDate", FieldType::Date),
                ModuleField::new("职级", "level", FieldType::Number),
            ],
            vec![
                json!({"name": "张三", "dept": "技术部", "joinDate": 1704230400000i64, "level": 5}),
                json!({"name": "李四", "dept": "市场部", "joinDate": 1704316800000i64, "level": 3}),
            ],
        ),
        (
            "工资管理",
            vec![
                ModuleField::new("员工姓名", "empName", FieldType::String).required(),
                ModuleField::new("基本工资", "baseSal", FieldType::Number).required().with_alias("S1"),
                ModuleField::new("绩效奖金", "bonus", FieldType::Number).required().with_alias("S2"),
                ModuleField::new("总计", "total", FieldType::Compute).with_formula("[S1]+[S2]"),
            ],
            vec![
                json!({"empName": "张三", "baseSal": 15000, "bonus": 3000}),
                json!({"empName": "李四", "baseSal": 12000, "bonus": 2500}),
            ],
        ),
    ]
}

/// Load the sample modules when the store holds none. Returns how many were created.
pub async fn seed_demo_data(store: &dyn ModuleStore) -> Result<usize, StoreError> {
    if !store.list_modules().await?.is_empty() {
        return Ok(0);
    }

    let mut created = 0;
    for (name, fields, rows) in demo_modules() {
        let module = store.create_module(name, fields).await?;
        for row in rows {
            let values: RowValues = row.as_object().cloned().unwrap_or_default();
            store.insert_row(&module.id, values).await?;
        }
        created += 1;
    }

    info!("Seeded {} demo modules", created);
    Ok(created)
}
