//! Full visit journey against a live PostgreSQL.
//!
//! Skipped unless DATABASE_URL points at a disposable database.

mod common;

use chrono::NaiveDate;
use common::{test_database_url, MemoryQueueCache};
use hospital_service::db::MIGRATOR;
use hospital_service::models::{
    CheckInRequest, CompleteConsultationQuery, DispenseRequest, EmergencyContact, Gender,
    IssuePrescriptionRequest, LabTestOrder, Medication, OrderLabTestsRequest, PatientStatus,
    QueuePriority, RegisterPatientRequest, TestStatus, UpdateLabTestRequest, UserRole,
};
use hospital_service::middleware::AuthUser;
use hospital_service::realtime::RealtimeEvent;
use hospital_service::services::UserDirectory;
use hospital_service::{AppError, AppState};
use serial_test::serial;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

async fn staff(db: &PgPool, role: UserRole) -> Uuid {
    sqlx::query_scalar(
        r#"
        INSERT INTO users (email, first_name, last_name, role)
        VALUES ($1, 'Test', $2, $2)
        RETURNING id
        "#,
    )
    .bind(format!("{}-{}@hospital.test", role, Uuid::new_v4()))
    .bind(role.as_str())
    .fetch_one(db)
    .await
    .expect("insert staff")
}

fn registration() -> RegisterPatientRequest {
    RegisterPatientRequest {
        first_name: "Amara".to_string(),
        last_name: "Eze".to_string(),
        date_of_birth: NaiveDate::from_ymd_opt(1990, 6, 1).expect("valid date"),
        gender: Gender::Female,
        email: None,
        phone: "+2348011111111".to_string(),
        address: "4 Hospital Road".to_string(),
        blood_group: Some("O+".to_string()),
        allergies: vec!["penicillin".to_string()],
        emergency_contact: EmergencyContact {
            name: "Obi Eze".to_string(),
            phone: "+2348022222222".to_string(),
            relationship: "spouse".to_string(),
        },
        insurance_info: None,
        medical_history: None,
    }
}

async fn setup() -> Option<(PgPool, AppState)> {
    let Some(url) = test_database_url() else {
        eprintln!("DATABASE_URL not set, skipping");
        return None;
    };
    let db = common::lazy_pool(&url);
    MIGRATOR.run(&db).await.expect("migrations");
    let state = AppState::build(
        db.clone(),
        Arc::new(MemoryQueueCache::default()),
        &Default::default(),
    );
    Some((db, state))
}

#[tokio::test]
#[serial]
async fn visit_travels_from_check_in_to_discharge() {
    let Some((db, state)) = setup().await else {
        return;
    };

    let receptionist = staff(&db, UserRole::Receptionist).await;
    let doctor = staff(&db, UserRole::Doctor).await;
    let technician = staff(&db, UserRole::LabTechnician).await;
    let pharmacist = staff(&db, UserRole::Pharmacist).await;
    let cashier = staff(&db, UserRole::Billing).await;

    let patient = state
        .patients
        .register(registration(), receptionist)
        .await
        .expect("register");
    assert!(patient.registration_number.starts_with("PAT-"));

    let visit = state
        .patients
        .check_in(
            patient.id,
            CheckInRequest {
                chief_complaint: "fever for three days".to_string(),
                vitals: None,
                department: None,
                priority: Some(QueuePriority::Urgent),
            },
            receptionist,
        )
        .await
        .expect("check in");
    assert_eq!(visit.status, PatientStatus::Waiting);
    assert_eq!(visit.department, "general");

    let position = state.queue.position(visit.id).await.expect("position");
    assert!(position.position >= 1);

    let again = state
        .patients
        .check_in(
            patient.id,
            CheckInRequest {
                chief_complaint: "second attempt".to_string(),
                vitals: None,
                department: None,
                priority: None,
            },
            receptionist,
        )
        .await;
    assert!(matches!(again, Err(AppError::Conflict(_))));

    let (tx, mut events) = mpsc::unbounded_channel();
    let doctor_user = AuthUser {
        id: doctor,
        email: "doctor@hospital.test".to_string(),
        role: UserRole::Doctor,
    };
    state.hub.connect(&doctor_user, Some("general"), tx).await;

    let visit = state.consultations.start(visit.id, doctor).await.expect("start");
    assert_eq!(visit.status, PatientStatus::InConsultation);
    assert_eq!(visit.doctor_id, Some(doctor));

    let announced = drain(&mut events);
    assert!(announced
        .iter()
        .any(|e| matches!(e, RealtimeEvent::PatientStatusChanged { .. })));
    assert!(announced
        .iter()
        .any(|e| matches!(e, RealtimeEvent::QueueStatusChanged { .. })));

    let repeat = state.consultations.start(visit.id, doctor).await.expect("idempotent start");
    assert_eq!(repeat.status, PatientStatus::InConsultation);
    assert!(events.try_recv().is_err(), "repeated start must stay silent");

    let tests = state
        .consultations
        .order_lab_tests(
            visit.id,
            doctor,
            OrderLabTestsRequest {
                tests: vec![LabTestOrder {
                    test_name: "Full blood count".to_string(),
                    test_category: "haematology".to_string(),
                }],
            },
        )
        .await
        .expect("order tests");
    assert_eq!(tests.len(), 1);
    let test_id = tests[0].id;

    let lab_update = |status| UpdateLabTestRequest {
        status,
        results: None,
        normal_range: None,
        is_critical: None,
        notes: None,
    };
    state
        .lab
        .update(test_id, technician, lab_update(TestStatus::SampleCollected))
        .await
        .expect("collect sample");
    assert_eq!(
        state.patients.get(patient.id).await.expect("patient").current_status,
        PatientStatus::TestsInProgress
    );

    let reported = state
        .lab
        .update(test_id, technician, lab_update(TestStatus::Reported))
        .await
        .expect("report");
    assert!(reported.reported_at.is_some());
    assert_eq!(
        state.patients.get(patient.id).await.expect("patient").current_status,
        PatientStatus::AwaitingResults
    );

    state.consultations.start(visit.id, doctor).await.expect("review results");
    let prescription = state
        .consultations
        .issue_prescription(
            visit.id,
            doctor,
            IssuePrescriptionRequest {
                medications: vec![Medication {
                    medication_name: "Paracetamol".to_string(),
                    dosage: "500mg".to_string(),
                    frequency: "three times daily".to_string(),
                    duration: "5 days".to_string(),
                    instructions: None,
                    quantity: 15,
                }],
                notes: None,
            },
        )
        .await
        .expect("prescribe");

    let visit = state
        .consultations
        .complete(visit.id, doctor, &CompleteConsultationQuery { discharge: false })
        .await
        .expect("complete consultation");
    assert_eq!(visit.status, PatientStatus::AtPharmacy);

    state
        .pharmacy
        .dispense(
            prescription.id,
            pharmacist,
            DispenseRequest {
                status: None,
                notes: None,
            },
        )
        .await
        .expect("dispense");
    assert_eq!(
        state.patients.get(patient.id).await.expect("patient").current_status,
        PatientStatus::AtBilling
    );

    let billing = state.billing.queue().await.expect("billing queue");
    assert!(billing.iter().any(|item| item.entry.visit_id == visit.id));

    let visit = state.billing.clear(visit.id, cashier).await.expect("clear");
    assert_eq!(visit.status, PatientStatus::Completed);
    assert!(visit.check_out_time.is_some());

    let cleared_again = state.billing.clear(visit.id, cashier).await.expect("repeat clear");
    assert_eq!(cleared_again.status, PatientStatus::Completed);

    let unread = state.notifications.unread_count(doctor).await.expect("unread");
    assert!(unread >= 1);

    let inbox = state
        .notifications
        .list(doctor, None, None)
        .await
        .expect("doctor's notifications");
    let notice = inbox.notifications.first().expect("lab result notice").id;
    let foreign = state.notifications.mark_read(notice, cashier).await;
    assert!(matches!(foreign, Err(AppError::NotFound(_))));
    let read = state.notifications.mark_read(notice, doctor).await.expect("mark read");
    assert!(read.is_read);
}

fn drain(events: &mut mpsc::UnboundedReceiver<RealtimeEvent>) -> Vec<RealtimeEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

#[tokio::test]
#[serial]
async fn billing_cannot_clear_a_visit_still_in_consultation() {
    let Some((db, state)) = setup().await else {
        return;
    };

    let receptionist = staff(&db, UserRole::Receptionist).await;
    let doctor = staff(&db, UserRole::Doctor).await;
    let cashier = staff(&db, UserRole::Billing).await;

    let patient = state
        .patients
        .register(registration(), receptionist)
        .await
        .expect("register");
    let visit = state
        .patients
        .check_in(
            patient.id,
            CheckInRequest {
                chief_complaint: "headache".to_string(),
                vitals: None,
                department: Some("Cardiology".to_string()),
                priority: None,
            },
            receptionist,
        )
        .await
        .expect("check in");
    assert_eq!(visit.department, "cardiology");

    state.consultations.start(visit.id, doctor).await.expect("start");

    let result = state.billing.clear(visit.id, cashier).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));
}

#[tokio::test]
#[serial]
async fn queue_numbers_increase_within_a_department() {
    let Some((db, state)) = setup().await else {
        return;
    };

    let receptionist = staff(&db, UserRole::Receptionist).await;
    let mut numbers = Vec::new();
    for complaint in ["rash", "itching", "sunburn"] {
        let patient = state
            .patients
            .register(registration(), receptionist)
            .await
            .expect("register");
        let visit = state
            .patients
            .check_in(
                patient.id,
                CheckInRequest {
                    chief_complaint: complaint.to_string(),
                    vitals: None,
                    department: Some("dermatology".to_string()),
                    priority: None,
                },
                receptionist,
            )
            .await
            .expect("check in");

        let number: i64 = sqlx::query_scalar(
            "SELECT queue_number FROM queue_entries WHERE visit_id = $1 AND status = 'waiting'",
        )
        .bind(visit.id)
        .fetch_one(&db)
        .await
        .expect("queue entry");
        numbers.push(number);
    }

    assert!(
        numbers.windows(2).all(|pair| pair[0] < pair[1]),
        "queue numbers must increase: {:?}",
        numbers
    );
}

#[tokio::test]
#[serial]
async fn deactivated_staff_lose_access() {
    let Some((db, _state)) = setup().await else {
        return;
    };

    let nurse = staff(&db, UserRole::Nurse).await;
    let users = UserDirectory::new(db.clone()).account_checks(Some(Duration::ZERO));
    users.ensure_active(nurse).await.expect("active nurse");

    sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
        .bind(nurse)
        .execute(&db)
        .await
        .expect("deactivate");

    assert!(matches!(
        users.ensure_active(nurse).await,
        Err(AppError::Unauthorized(_))
    ));
    assert!(matches!(
        users.ensure_active(Uuid::new_v4()).await,
        Err(AppError::Unauthorized(_))
    ));
}
