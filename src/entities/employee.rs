//! External employee snapshot rows keyed by `(EmployeeId, PositionId)`.
//!
//! Headers come from several export tools, so most columns accept a few
//! spellings. An update replaces every non-key field with the incoming row.

use crate::entities::{kind_mismatch, nothing_to_prepare};
use crate::error::ImportResult;
use crate::import::source::Column;
use crate::import::stats::RejectCounter;
use crate::import::strategy::{Candidate, EntityStrategy, RunContext, UpsertPolicy};
use crate::import::validate::{Rejection, ValidRow};
use crate::models::{EntityKind, ExtEmployee, Record};

const COLUMNS: &[Column] = &[
    Column::required("EmployeeId")
        .aliases(&["Employee ID", "EmpId"])
        .max(20),
    Column::optional("EmployeeName")
        .aliases(&["Employee Name", "EmpName"])
        .max(100),
    Column::required("PositionId")
        .aliases(&["Position ID"])
        .max(100),
    Column::optional("PositionName")
        .aliases(&["Position Name"])
        .max(100),
    Column::optional("Area").max(100),
    Column::optional("PlantArea").aliases(&["Plant Area"]).max(100),
    Column::optional("Directorate").max(100),
    Column::optional("Function").max(100),
    Column::optional("Department").max(100),
    Column::optional("Email").max(100),
    Column::optional("Level").max(100),
    Column::optional("SuperiorId").aliases(&["Superior ID"]).max(20),
    Column::optional("SuperiorPositionId")
        .aliases(&["Superior Position ID"])
        .max(100),
    Column::optional("UserName").aliases(&["Username"]).max(30),
    Column::optional("Unit").max(50),
    Column::optional("Posgrd").aliases(&["PosGrd"]).max(100),
    Column::optional("CostCenter").aliases(&["Cost Center"]).max(10),
    Column::optional("Entity").max(100),
    Column::optional("LastUpdate").aliases(&["Last Update", "UpdatedAt"]),
    Column::optional("HelperIsDelegate").aliases(&["Helper_IsDelegate"]),
    Column::optional("HelperEmployeePositionTypeId").aliases(&["Helper_EmployeePositionTypeId"]),
];

pub const STRATEGY: EntityStrategy = EntityStrategy {
    name: "extemployee",
    aliases: &["extemployeefromsinta", "employee"],
    kind: EntityKind::ExtEmployee,
    columns: COLUMNS,
    reject: RejectCounter::Skipped,
    policy: UpsertPolicy::Upsert,
    loads_roles: false,
    build,
    merge,
    prepare: nothing_to_prepare,
};

fn build(row: &ValidRow, _ctx: &mut RunContext) -> Result<Candidate, Rejection> {
    Ok(Candidate::new(Record::ExtEmployee(ExtEmployee {
        id: None,
        employee_id: row.require("EmployeeId")?,
        employee_name: row.text("EmployeeName"),
        position_id: row.require("PositionId")?,
        position_name: row.text("PositionName"),
        area: row.text("Area"),
        plant_area: row.text("PlantArea"),
        directorate: row.text("Directorate"),
        function: row.text("Function"),
        department: row.text("Department"),
        email: row.text("Email"),
        level: row.text("Level"),
        superior_id: row.text("SuperiorId"),
        superior_position_id: row.text("SuperiorPositionId"),
        user_name: row.text("UserName"),
        unit: row.text("Unit"),
        posgrd: row.text("Posgrd"),
        cost_center: row.text("CostCenter"),
        entity: row.text("Entity"),
        last_update: row.datetime("LastUpdate"),
        helper_is_delegate: row.flag("HelperIsDelegate"),
        helper_employee_position_type_id: row.byte("HelperEmployeePositionTypeId"),
    })))
}

fn merge(current: &mut Record, incoming: Record, _ctx: &mut RunContext) -> ImportResult<bool> {
    let found = incoming.kind();
    let (Record::ExtEmployee(current), Record::ExtEmployee(mut incoming)) = (current, incoming)
    else {
        return Err(kind_mismatch(EntityKind::ExtEmployee, found));
    };
    incoming.id = current.id;
    if *current == incoming {
        return Ok(false);
    }
    *current = incoming;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::PasswordService;
    use crate::import::source::ImportRow;
    use crate::import::validate::RowValidator;
    use chrono::{Datelike, Timelike};
    use std::sync::Arc;

    fn build_employee(row: ImportRow) -> ExtEmployee {
        let mut ctx = RunContext::new(Arc::new(PasswordService::new().unwrap()));
        let valid = RowValidator::new(COLUMNS).validate(&row).expect("valid");
        match build(&valid, &mut ctx).expect("candidate").record {
            Record::ExtEmployee(employee) => employee,
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn parses_typed_columns() {
        let employee = build_employee(
            ImportRow::new(2)
                .with("EmployeeId", "E001")
                .with("PositionId", "P-9")
                .with("LastUpdate", "31/01/2024 08:30:00")
                .with("HelperIsDelegate", "Y")
                .with("HelperEmployeePositionTypeId", "3"),
        );
        let updated = employee.last_update.expect("date");
        assert_eq!((updated.day(), updated.month(), updated.hour()), (31, 1, 8));
        assert_eq!(employee.helper_is_delegate, Some(true));
        assert_eq!(employee.helper_employee_position_type_id, Some(3));
    }

    #[test]
    fn unparseable_values_become_absent() {
        let employee = build_employee(
            ImportRow::new(2)
                .with("EmployeeId", "E001")
                .with("PositionId", "P-9")
                .with("LastUpdate", "someday")
                .with("HelperEmployeePositionTypeId", "999"),
        );
        assert_eq!(employee.last_update, None);
        assert_eq!(employee.helper_employee_position_type_id, None);
    }

    #[test]
    fn update_replaces_all_fields_but_keeps_id() {
        let mut ctx = RunContext::new(Arc::new(PasswordService::new().unwrap()));
        let mut stored = build_employee(
            ImportRow::new(2)
                .with("EmployeeId", "E001")
                .with("PositionId", "P-9")
                .with("Unit", "North"),
        );
        stored.id = Some(41);
        let mut current = Record::ExtEmployee(stored);

        let incoming = build_employee(
            ImportRow::new(3)
                .with("EmployeeId", "E001")
                .with("PositionId", "P-9")
                .with("Area", "Plant 2"),
        );
        assert!(merge(&mut current, Record::ExtEmployee(incoming.clone()), &mut ctx).unwrap());
        let Record::ExtEmployee(updated) = &current else { panic!("employee") };
        assert_eq!(updated.id, Some(41));
        assert_eq!(updated.unit, None);
        assert_eq!(updated.area.as_deref(), Some("Plant 2"));

        assert!(!merge(&mut current, Record::ExtEmployee(incoming), &mut ctx).unwrap());
    }
}
