//! One organization can never reach another's resources

mod common;

use brokkr_compute::{ComputeError, ExecuteRequest, ProvisionRequest, ResourceStatus, Transfer};
use common::*;
use uuid::Uuid;

fn denied(err: ComputeError, resource: Uuid, intruder: Uuid) {
    match err {
        ComputeError::AccessDenied {
            resource_id,
            organization_id,
        } => {
            assert_eq!(resource_id, resource);
            assert_eq!(organization_id, intruder);
        }
        other => panic!("expected access denied, got {other:?}"),
    }
}

#[tokio::test]
async fn test_foreign_organization_reaches_nothing() {
    let h = harness();
    let (owner, intruder) = (org(), org());
    let view = h.manager.provision(ProvisionRequest::new(owner)).await.unwrap();

    let cloud_calls = h.provider.call_count();
    let ssh_calls = h.shell.command_count();

    denied(
        h.manager
            .execute(view.id, intruder, ExecuteRequest::new("cat /etc/shadow"))
            .await
            .unwrap_err(),
        view.id,
        intruder,
    );
    denied(
        h.manager
            .transfer(
                view.id,
                intruder,
                Transfer::Push {
                    remote_path: "/root/.ssh/authorized_keys".to_string(),
                    content: b"ssh-ed25519 AAAA attacker".to_vec(),
                },
            )
            .await
            .unwrap_err(),
        view.id,
        intruder,
    );
    denied(
        h.manager
            .transfer(
                view.id,
                intruder,
                Transfer::Pull {
                    remote_path: "/etc/brokkr/resource.env".to_string(),
                },
            )
            .await
            .unwrap_err(),
        view.id,
        intruder,
    );
    denied(
        h.manager.teardown(view.id, intruder).await.unwrap_err(),
        view.id,
        intruder,
    );
    denied(
        h.manager.describe(view.id, intruder).await.unwrap_err(),
        view.id,
        intruder,
    );

    assert_eq!(h.provider.call_count(), cloud_calls);
    assert_eq!(h.shell.command_count(), ssh_calls);
    assert!(h.manager.list(intruder).await.unwrap().is_empty());

    // the owner is unaffected
    let own = h.manager.describe(view.id, owner).await.unwrap();
    assert_eq!(own.status, ResourceStatus::Active);
    assert_eq!(h.manager.list(owner).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_resource_is_not_found() {
    let h = harness();
    let missing = Uuid::new_v4();

    let err = h
        .manager
        .execute(missing, org(), ExecuteRequest::new("true"))
        .await
        .unwrap_err();
    assert!(matches!(err, ComputeError::NotFound(id) if id == missing));
    assert!(matches!(
        h.manager.teardown(missing, org()).await,
        Err(ComputeError::NotFound(_))
    ));
    assert_eq!(h.provider.call_count(), 0);
}

#[tokio::test]
async fn test_quotas_are_per_organization() {
    let mut settings = fast_settings();
    settings.quotas.max_active_per_org = 1;
    let h = harness_with(settings, crypto());
    let (a, b) = (org(), org());

    h.manager.provision(ProvisionRequest::new(a)).await.unwrap();
    h.manager.provision(ProvisionRequest::new(b)).await.unwrap();
    assert!(matches!(
        h.manager.provision(ProvisionRequest::new(a)).await,
        Err(ComputeError::QuotaExceeded(_))
    ));
}
