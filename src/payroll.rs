use crate::grading::{round_half_up, CalcError};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    LateComing,
    HalfDay,
    Absent,
    EarlyDeparture,
}

impl RuleType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "late_coming" => Some(RuleType::LateComing),
            "half_day" => Some(RuleType::HalfDay),
            "absent" => Some(RuleType::Absent),
            "early_departure" => Some(RuleType::EarlyDeparture),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RuleType::LateComing => "late_coming",
            RuleType::HalfDay => "half_day",
            RuleType::Absent => "absent",
            RuleType::EarlyDeparture => "early_departure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionType {
    Percentage,
    FixedAmount,
    FullDay,
    HalfDay,
}

impl DeductionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(DeductionType::Percentage),
            "fixed_amount" => Some(DeductionType::FixedAmount),
            "full_day" => Some(DeductionType::FullDay),
            "half_day" => Some(DeductionType::HalfDay),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeductionType::Percentage => "percentage",
            DeductionType::FixedAmount => "fixed_amount",
            DeductionType::FullDay => "full_day",
            DeductionType::HalfDay => "half_day",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayStatus {
    Present,
    Absent,
    HalfDay,
    Late,
    EarlyDeparture,
}

impl DayStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(DayStatus::Present),
            "absent" => Some(DayStatus::Absent),
            "half_day" => Some(DayStatus::HalfDay),
            "late" => Some(DayStatus::Late),
            "early_departure" => Some(DayStatus::EarlyDeparture),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DayStatus::Present => "present",
            DayStatus::Absent => "absent",
            DayStatus::HalfDay => "half_day",
            DayStatus::Late => "late",
            DayStatus::EarlyDeparture => "early_departure",
        }
    }

    fn rule_type(self) -> Option<RuleType> {
        match self {
            DayStatus::Present => None,
            DayStatus::Absent => Some(RuleType::Absent),
            DayStatus::HalfDay => Some(RuleType::HalfDay),
            DayStatus::Late => Some(RuleType::LateComing),
            DayStatus::EarlyDeparture => Some(RuleType::EarlyDeparture),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductionRule {
    pub id: Option<String>,
    pub rule_name: String,
    pub rule_type: RuleType,
    /// Shown to admins; never evaluated.
    pub condition_text: Option<String>,
    pub deduction_type: DeductionType,
    pub deduction_value: f64,
    pub grace_minutes: i64,
    pub max_late_count: i64,
    pub active: bool,
    pub sort_order: i64,
}

/// Configuration-time validation; evaluation assumes rules already passed.
pub fn validate_rule(rule: &DeductionRule) -> Result<(), CalcError> {
    if rule.rule_name.trim().is_empty() {
        return Err(CalcError::new("invalid_rule", "ruleName must not be empty"));
    }
    if rule.deduction_value < 0.0 || !rule.deduction_value.is_finite() {
        return Err(CalcError::new(
            "invalid_rule",
            "deductionValue must be non-negative",
        ));
    }
    if rule.deduction_type == DeductionType::Percentage && rule.deduction_value > 100.0 {
        return Err(CalcError::new(
            "invalid_rule",
            "percentage deduction cannot exceed 100",
        ));
    }
    if rule.grace_minutes < 0 {
        return Err(CalcError::new(
            "invalid_rule",
            "graceMinutes must be non-negative",
        ));
    }
    if rule.max_late_count < 0 {
        return Err(CalcError::new(
            "invalid_rule",
            "maxLateCount must be non-negative",
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct AttendanceDay {
    pub teacher_id: String,
    pub date: NaiveDate,
    pub check_in: Option<NaiveTime>,
    pub check_out: Option<NaiveTime>,
    pub status: DayStatus,
    pub late_minutes: i64,
    pub early_minutes: i64,
    pub manual_override: bool,
    pub override_amount: f64,
    pub override_reason: Option<String>,
}

impl AttendanceDay {
    pub fn total_hours(&self) -> Option<f64> {
        let (check_in, check_out) = (self.check_in?, self.check_out?);
        let minutes = (check_out - check_in).num_minutes();
        if minutes < 0 {
            return None;
        }
        Some(round_half_up(minutes as f64 / 60.0, 2))
    }
}

/// Pick the rule a record is evaluated against: the first active rule of the
/// matching type in configured order. Admins set precedence by reordering.
pub fn resolve_rule<'a>(rules: &'a [DeductionRule], status: DayStatus) -> Option<&'a DeductionRule> {
    let wanted = status.rule_type()?;
    rules
        .iter()
        .filter(|r| r.active && r.rule_type == wanted)
        .min_by_key(|r| r.sort_order)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayOutcome {
    pub deduction_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduction_reason: Option<String>,
    /// Running late-event count for the (teacher, month) after this day.
    pub late_count: i64,
}

fn deduction_amount(rule: &DeductionRule, per_day_salary: f64) -> f64 {
    match rule.deduction_type {
        DeductionType::Percentage => per_day_salary * rule.deduction_value / 100.0,
        DeductionType::FixedAmount => rule.deduction_value,
        DeductionType::FullDay => per_day_salary,
        DeductionType::HalfDay => per_day_salary / 2.0,
    }
}

/// Evaluate one day against its resolved rule.
///
/// The late counter must be threaded by the caller over the month's records
/// in date order; every late record advances it, whether or not money comes
/// off. A manual override replaces the computed amount and reason, but the
/// arrival was still late, so the counter advances all the same.
pub fn evaluate_attendance_day(
    day: &AttendanceDay,
    rule: Option<&DeductionRule>,
    late_count_so_far: i64,
    per_day_salary: f64,
) -> DayOutcome {
    let late_count = if day.status == DayStatus::Late {
        late_count_so_far + 1
    } else {
        late_count_so_far
    };

    if day.manual_override {
        return DayOutcome {
            deduction_amount: round_half_up(day.override_amount, 2),
            deduction_reason: day.override_reason.clone(),
            late_count,
        };
    }

    let Some(rule) = rule else {
        return DayOutcome {
            deduction_amount: 0.0,
            deduction_reason: None,
            late_count,
        };
    };

    let (amount, reason) = match rule.rule_type {
        RuleType::LateComing => {
            let effective = day.late_minutes - rule.grace_minutes;
            if effective <= 0 || late_count <= rule.max_late_count {
                (0.0, None)
            } else {
                (
                    deduction_amount(rule, per_day_salary),
                    Some(format!(
                        "{}: {} min past grace, late #{} this month",
                        rule.rule_name, effective, late_count
                    )),
                )
            }
        }
        RuleType::EarlyDeparture => {
            let effective = day.early_minutes - rule.grace_minutes;
            if effective <= 0 {
                (0.0, None)
            } else {
                (
                    deduction_amount(rule, per_day_salary),
                    Some(format!("{}: left {} min early past grace", rule.rule_name, effective)),
                )
            }
        }
        RuleType::HalfDay | RuleType::Absent => (
            deduction_amount(rule, per_day_salary),
            Some(rule.rule_name.clone()),
        ),
    };

    DayOutcome {
        deduction_amount: round_half_up(amount, 2),
        deduction_reason: reason,
        late_count,
    }
}

#[derive(Debug, Clone)]
pub struct SalaryConfig {
    pub id: Option<String>,
    pub teacher_id: String,
    pub basic_monthly: f64,
    pub per_day: f64,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
    pub active: bool,
}

/// Select the config whose `[effectiveFrom, effectiveTo)` interval contains
/// `on`. With overlapping history the latest effectiveFrom wins.
pub fn select_config<'a>(configs: &'a [SalaryConfig], on: NaiveDate) -> Option<&'a SalaryConfig> {
    configs
        .iter()
        .filter(|c| {
            c.active
                && c.effective_from <= on
                && c.effective_to.map(|to| on < to).unwrap_or(true)
        })
        .max_by_key(|c| c.effective_from)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayDetail {
    pub date: NaiveDate,
    pub status: DayStatus,
    pub deduction_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deduction_reason: Option<String>,
    pub manual_override: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySalaryCalculation {
    pub teacher_id: String,
    pub month: u32,
    pub year: i32,
    pub basic_salary: f64,
    pub per_day_salary: f64,
    pub total_working_days: usize,
    pub present_days: usize,
    pub absent_days: usize,
    pub half_days: usize,
    pub late_days: usize,
    pub total_deductions: f64,
    pub net_salary: f64,
    pub is_approved: bool,
    pub details: Vec<DayDetail>,
}

/// Assemble one teacher's month from attendance records and active rules.
///
/// Records are evaluated in date order with the late counter threaded
/// through. Net salary is basic minus total deductions, deliberately not
/// clamped at zero so a pathological rule setup is visible to the approver.
pub fn calculate_month(
    teacher_id: &str,
    month: u32,
    year: i32,
    config: &SalaryConfig,
    records: &[AttendanceDay],
    rules: &[DeductionRule],
) -> MonthlySalaryCalculation {
    let mut ordered: Vec<&AttendanceDay> = records.iter().collect();
    ordered.sort_by_key(|r| r.date);

    let mut late_count = 0_i64;
    let mut total_deductions = 0.0_f64;
    let mut present_days = 0_usize;
    let mut absent_days = 0_usize;
    let mut half_days = 0_usize;
    let mut late_days = 0_usize;
    let mut details: Vec<DayDetail> = Vec::with_capacity(ordered.len());

    for day in ordered {
        match day.status {
            DayStatus::Present | DayStatus::EarlyDeparture => present_days += 1,
            DayStatus::Absent => absent_days += 1,
            DayStatus::HalfDay => half_days += 1,
            DayStatus::Late => late_days += 1,
        }
        let rule = resolve_rule(rules, day.status);
        let outcome = evaluate_attendance_day(day, rule, late_count, config.per_day);
        late_count = outcome.late_count;
        total_deductions += outcome.deduction_amount;
        details.push(DayDetail {
            date: day.date,
            status: day.status,
            deduction_amount: outcome.deduction_amount,
            deduction_reason: outcome.deduction_reason,
            manual_override: day.manual_override,
        });
    }

    let total_deductions = round_half_up(total_deductions, 2);
    MonthlySalaryCalculation {
        teacher_id: teacher_id.to_string(),
        month,
        year,
        basic_salary: config.basic_monthly,
        per_day_salary: config.per_day,
        total_working_days: details.len(),
        present_days,
        absent_days,
        half_days,
        late_days,
        total_deductions,
        net_salary: round_half_up(config.basic_monthly - total_deductions, 2),
        is_approved: false,
        details,
    }
}

pub fn first_of_month(year: i32, month: u32) -> Result<NaiveDate, CalcError> {
    NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
        CalcError::new("bad_params", "month must be between 1 and 12")
            .with_details(json!({ "month": month, "year": year }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).expect("date")
    }

    fn late_rule() -> DeductionRule {
        DeductionRule {
            id: None,
            rule_name: "Late arrival".to_string(),
            rule_type: RuleType::LateComing,
            condition_text: None,
            deduction_type: DeductionType::FixedAmount,
            deduction_value: 100.0,
            grace_minutes: 10,
            max_late_count: 3,
            active: true,
            sort_order: 0,
        }
    }

    fn day(d: u32, status: DayStatus, late_minutes: i64) -> AttendanceDay {
        AttendanceDay {
            teacher_id: "t1".to_string(),
            date: date(d),
            check_in: None,
            check_out: None,
            status,
            late_minutes,
            early_minutes: 0,
            manual_override: false,
            override_amount: 0.0,
            override_reason: None,
        }
    }

    fn config() -> SalaryConfig {
        SalaryConfig {
            id: None,
            teacher_id: "t1".to_string(),
            basic_monthly: 30000.0,
            per_day: 1000.0,
            effective_from: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            effective_to: None,
            active: true,
        }
    }

    #[test]
    fn validate_rule_bounds() {
        assert!(validate_rule(&late_rule()).is_ok());

        let mut r = late_rule();
        r.deduction_value = -5.0;
        assert_eq!(validate_rule(&r).unwrap_err().code, "invalid_rule");

        let mut r = late_rule();
        r.deduction_type = DeductionType::Percentage;
        r.deduction_value = 150.0;
        assert_eq!(validate_rule(&r).unwrap_err().code, "invalid_rule");
        r.deduction_value = 100.0;
        assert!(validate_rule(&r).is_ok());

        let mut r = late_rule();
        r.rule_name = "  ".to_string();
        assert_eq!(validate_rule(&r).unwrap_err().code, "invalid_rule");
    }

    #[test]
    fn grace_minutes_boundary() {
        let rule = late_rule();
        // Exactly on grace: no deduction, even past the forgiveness cap.
        let out = evaluate_attendance_day(&day(3, DayStatus::Late, 10), Some(&rule), 10, 1000.0);
        assert_eq!(out.deduction_amount, 0.0);
        assert_eq!(out.late_count, 11);

        // One past grace but within the forgiveness cap: still free.
        let out = evaluate_attendance_day(&day(3, DayStatus::Late, 11), Some(&rule), 0, 1000.0);
        assert_eq!(out.deduction_amount, 0.0);
        assert_eq!(out.late_count, 1);

        // One past grace, cap exhausted: charged.
        let out = evaluate_attendance_day(&day(3, DayStatus::Late, 11), Some(&rule), 3, 1000.0);
        assert_eq!(out.deduction_amount, 100.0);
        assert_eq!(out.late_count, 4);
        assert!(out.deduction_reason.is_some());
    }

    #[test]
    fn deduction_types() {
        let mk = |dt: DeductionType, value: f64| DeductionRule {
            rule_type: RuleType::Absent,
            deduction_type: dt,
            deduction_value: value,
            ..late_rule()
        };
        let absent = day(5, DayStatus::Absent, 0);
        let amount = |r: &DeductionRule| {
            evaluate_attendance_day(&absent, Some(r), 0, 1000.0).deduction_amount
        };
        assert_eq!(amount(&mk(DeductionType::Percentage, 25.0)), 250.0);
        assert_eq!(amount(&mk(DeductionType::FixedAmount, 333.0)), 333.0);
        assert_eq!(amount(&mk(DeductionType::FullDay, 0.0)), 1000.0);
        assert_eq!(amount(&mk(DeductionType::HalfDay, 0.0)), 500.0);
    }

    #[test]
    fn early_departure_uses_grace() {
        let rule = DeductionRule {
            rule_type: RuleType::EarlyDeparture,
            deduction_type: DeductionType::HalfDay,
            grace_minutes: 15,
            ..late_rule()
        };
        let mut d = day(4, DayStatus::EarlyDeparture, 0);
        d.early_minutes = 15;
        let out = evaluate_attendance_day(&d, Some(&rule), 0, 1000.0);
        assert_eq!(out.deduction_amount, 0.0);
        d.early_minutes = 40;
        let out = evaluate_attendance_day(&d, Some(&rule), 0, 1000.0);
        assert_eq!(out.deduction_amount, 500.0);
    }

    #[test]
    fn manual_override_wins_and_counter_still_advances() {
        let rule = late_rule();
        let mut d = day(6, DayStatus::Late, 45);
        d.manual_override = true;
        d.override_amount = 75.0;
        d.override_reason = Some("Bus strike, waived to 75".to_string());
        let out = evaluate_attendance_day(&d, Some(&rule), 5, 1000.0);
        assert_eq!(out.deduction_amount, 75.0);
        assert_eq!(out.deduction_reason.as_deref(), Some("Bus strike, waived to 75"));
        assert_eq!(out.late_count, 6);
    }

    #[test]
    fn resolve_rule_prefers_configured_order() {
        let mut first = DeductionRule {
            rule_type: RuleType::Absent,
            ..late_rule()
        };
        first.rule_name = "Absent primary".to_string();
        first.sort_order = 0;
        let mut second = first.clone();
        second.rule_name = "Absent fallback".to_string();
        second.sort_order = 1;
        let mut inactive = first.clone();
        inactive.rule_name = "Retired".to_string();
        inactive.sort_order = -1;
        inactive.active = false;

        let rules = vec![second.clone(), inactive, first];
        let picked = resolve_rule(&rules, DayStatus::Absent).unwrap();
        assert_eq!(picked.rule_name, "Absent primary");
        assert!(resolve_rule(&rules, DayStatus::Present).is_none());
    }

    #[test]
    fn select_config_interval_is_half_open() {
        let mut old = config();
        old.effective_from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        old.effective_to = Some(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        old.basic_monthly = 25000.0;
        let current = config();
        let configs = vec![old, current];

        let dec = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert_eq!(select_config(&configs, dec).unwrap().basic_monthly, 25000.0);
        // effectiveTo is exclusive: Jan 1 belongs to the new config.
        let jan = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        assert_eq!(select_config(&configs, jan).unwrap().basic_monthly, 30000.0);
        let before = NaiveDate::from_ymd_opt(2023, 6, 1).unwrap();
        assert!(select_config(&configs, before).is_none());
    }

    #[test]
    fn month_of_five_late_events_matches_expected_net() {
        let rules = vec![late_rule()];
        let mut records: Vec<AttendanceDay> = (3..=7)
            .map(|d| day(d, DayStatus::Late, 15))
            .collect();
        for d in 10..=14 {
            records.push(day(d, DayStatus::Present, 0));
        }
        // Shuffle in a couple out of order; the calculator sorts by date.
        records.swap(0, 4);

        let calc = calculate_month("t1", 3, 2025, &config(), &records, &rules);
        assert_eq!(calc.total_working_days, 10);
        assert_eq!(calc.present_days, 5);
        assert_eq!(calc.late_days, 5);
        assert_eq!(calc.total_deductions, 200.0);
        assert_eq!(calc.net_salary, 29800.0);
        assert!(!calc.is_approved);

        let charged: Vec<f64> = calc
            .details
            .iter()
            .filter(|d| d.status == DayStatus::Late)
            .map(|d| d.deduction_amount)
            .collect();
        assert_eq!(charged, vec![0.0, 0.0, 0.0, 100.0, 100.0]);
    }

    #[test]
    fn net_salary_can_go_negative() {
        let rule = DeductionRule {
            rule_type: RuleType::Absent,
            deduction_type: DeductionType::FixedAmount,
            deduction_value: 2000.0,
            ..late_rule()
        };
        let records: Vec<AttendanceDay> =
            (1..=20).map(|d| day(d, DayStatus::Absent, 0)).collect();
        let mut cfg = config();
        cfg.basic_monthly = 30000.0;
        let calc = calculate_month("t1", 3, 2025, &cfg, &records, &[rule]);
        assert_eq!(calc.total_deductions, 40000.0);
        assert_eq!(calc.net_salary, -10000.0);
    }

    #[test]
    fn total_hours_from_punches() {
        let mut d = day(3, DayStatus::Present, 0);
        d.check_in = NaiveTime::from_hms_opt(8, 30, 0);
        d.check_out = NaiveTime::from_hms_opt(16, 15, 0);
        assert_eq!(d.total_hours(), Some(7.75));
        d.check_out = None;
        assert_eq!(d.total_hours(), None);
    }
}
