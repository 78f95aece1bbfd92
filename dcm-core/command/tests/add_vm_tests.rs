// 虚拟机创建命令测试
mod common;

use std::sync::Arc;

use common::{wait_until_done, Fixture, GatedDataPlane};
use dcm_command::{
    ActionType, AddVmParameters, CommandError, CreationStatus, EngineMessage, NewDiskSpec,
};
use dcm_common::{Guid, ImageStatus, Snapshot, StorageDomainStatus, VmStatus};

#[tokio::test]
async fn test_thin_vm_is_created_synchronously() {
    let fx = Fixture::new();
    let (backend, tasks) = fx.scripted_backend();
    let cluster = fx.add_cluster().await;
    let domain = fx.add_domain(StorageDomainStatus::Active, u64::MAX).await;
    let base = fx.add_image(&domain, "base", ImageStatus::Ok).await;
    let template = fx.add_template(&[&base]).await;

    let params = AddVmParameters::new("web-01", cluster.id).template(template.id);
    let vm_id = params.vm_id;
    let ret = backend
        .run_action(ActionType::AddVm, params.into(), Guid::new_guid())
        .await
        .unwrap();

    assert_eq!(ret.result.target_id, vm_id);
    assert!(ret.result.task.is_none());
    assert_eq!(ret.creation_status, None);
    assert_eq!(tasks.enqueued(), 0);

    let vm = fx.repos.vms().get(vm_id).await.unwrap();
    assert_eq!(vm.status, VmStatus::Down);
    assert_eq!(vm.template_id, Some(template.id));

    let elements = fx.repos.vms().get_elements_for_vm(vm_id).await.unwrap();
    assert_eq!(elements.len(), 1);
    let layers = fx
        .repos
        .disk_images()
        .get_by_disk_id(elements[0].disk_id)
        .await
        .unwrap();
    assert_eq!(layers[0].parent_id, Some(base.image_id));
}

#[tokio::test]
async fn test_clone_from_template_in_background() {
    let fx = Fixture::new();
    let data_plane = Arc::new(GatedDataPlane::new(false));
    let backend = fx.backend_with(data_plane.clone());
    let cluster = fx.add_cluster().await;
    let domain = fx.add_domain(StorageDomainStatus::Active, u64::MAX).await;
    let boot = fx.add_image(&domain, "boot", ImageStatus::Ok).await;
    let data = fx.add_image(&domain, "data", ImageStatus::Ok).await;
    let template = fx.add_template(&[&boot, &data]).await;

    let params = AddVmParameters::new("db-01", cluster.id).template(template.id);
    let vm_id = params.vm_id;
    let ret = backend
        .run_action(ActionType::AddVmFromTemplate, params.into(), Guid::new_guid())
        .await
        .unwrap();

    assert!(matches!(
        ret.creation_status,
        Some(CreationStatus::Pending) | Some(CreationStatus::InProgress)
    ));
    assert_eq!(
        fx.repos.vms().get(vm_id).await.unwrap().status,
        VmStatus::ImageLocked
    );

    data_plane.open();
    let handle = ret.result.task.unwrap();
    assert_eq!(
        wait_until_done(&backend, &handle).await.unwrap(),
        CreationStatus::Complete
    );

    assert_eq!(fx.repos.vms().get(vm_id).await.unwrap().status, VmStatus::Down);
    let elements = fx.repos.vms().get_elements_for_vm(vm_id).await.unwrap();
    assert_eq!(elements.len(), 2);
    for element in elements {
        for image in fx
            .repos
            .disk_images()
            .get_by_disk_id(element.disk_id)
            .await
            .unwrap()
        {
            assert_eq!(image.image_status, ImageStatus::Ok);
        }
    }
    assert_eq!(fx.disk_images.inserts(), 2);
}

#[tokio::test]
async fn test_failed_scratch_disks_become_illegal() {
    let fx = Fixture::new();
    let data_plane = Arc::new(GatedDataPlane::new(true));
    data_plane.open();
    let backend = fx.backend_with(data_plane);
    let cluster = fx.add_cluster().await;
    let domain = fx.add_domain(StorageDomainStatus::Active, u64::MAX).await;

    let disk = NewDiskSpec::new("boot", 10 << 30);
    let params = AddVmParameters::new("scratch", cluster.id)
        .storage_domain(domain.id)
        .disk(disk.clone());
    let vm_id = params.vm_id;

    let err = match backend
        .run_action(ActionType::AddVmFromScratch, params.into(), Guid::new_guid())
        .await
    {
        Ok(ret) => wait_until_done(&backend, &ret.result.task.unwrap())
            .await
            .unwrap_err(),
        Err(e) => e,
    };
    assert!(err.is_execution_failure());

    assert_eq!(fx.image_status(disk.image_id).await, ImageStatus::Illegal);
    assert_eq!(fx.repos.vms().get(vm_id).await.unwrap().status, VmStatus::Down);
}

#[tokio::test]
async fn test_validation_order_for_new_vm() {
    let fx = Fixture::new();
    let (backend, _) = fx.scripted_backend();
    let user = Guid::new_guid();
    let cluster = fx.add_cluster().await;
    let domain = fx.add_domain(StorageDomainStatus::Active, u64::MAX).await;
    let locked = fx.add_image(&domain, "base", ImageStatus::Locked).await;
    let template = fx.add_template(&[&locked]).await;
    fx.add_vm("taken", VmStatus::Down).await;

    let reason = |outcome: dcm_command::ValidationOutcome| outcome.reason();

    // 名称非法先于集群缺失
    let params = AddVmParameters::new("bad name", Guid::new_guid()).template(template.id);
    let outcome = backend
        .validate(ActionType::AddVmFromTemplate, params.into(), user)
        .await
        .unwrap();
    assert_eq!(reason(outcome), Some(EngineMessage::NameMayNotContainSpecialChars));

    let params = AddVmParameters::new("taken", Guid::new_guid()).template(template.id);
    let outcome = backend
        .validate(ActionType::AddVmFromTemplate, params.into(), user)
        .await
        .unwrap();
    assert_eq!(reason(outcome), Some(EngineMessage::ClusterCanNotBeEmpty));

    let params = AddVmParameters::new("taken", cluster.id).template(template.id);
    let outcome = backend
        .validate(ActionType::AddVmFromTemplate, params.into(), user)
        .await
        .unwrap();
    assert_eq!(reason(outcome), Some(EngineMessage::NameAlreadyUsed));

    let params = AddVmParameters::new("fresh", cluster.id).template(Guid::new_guid());
    let outcome = backend
        .validate(ActionType::AddVmFromTemplate, params.into(), user)
        .await
        .unwrap();
    assert_eq!(reason(outcome), Some(EngineMessage::TemplateDoesNotExist));

    let params = AddVmParameters::new("fresh", cluster.id).template(template.id);
    let outcome = backend
        .validate(ActionType::AddVmFromTemplate, params.into(), user)
        .await
        .unwrap();
    assert_eq!(reason(outcome), Some(EngineMessage::DisksLocked));
}

#[tokio::test]
async fn test_clone_from_snapshot_checks() {
    let fx = Fixture::new();
    let (backend, _) = fx.scripted_backend();
    let user = Guid::new_guid();
    let cluster = fx.add_cluster().await;

    let params = AddVmParameters::new("restored", cluster.id).snapshot(Guid::new_guid());
    let outcome = backend
        .validate(ActionType::AddVmFromSnapshot, params.into(), user)
        .await
        .unwrap();
    assert_eq!(outcome.reason(), Some(EngineMessage::VmSnapshotDoesNotExist));

    let domain = fx.add_domain(StorageDomainStatus::Active, 1024).await;
    let image = fx.add_image(&domain, "data", ImageStatus::Ok).await;
    let snapshot = Snapshot {
        id: Guid::new_guid(),
        vm_id: Guid::new_guid(),
        description: "nightly".into(),
        disk_image_ids: vec![image.image_id],
        created_at: chrono::Utc::now(),
    };
    fx.repos.snapshots().upsert(snapshot.clone()).await.unwrap();

    let params = AddVmParameters::new("restored", cluster.id).snapshot(snapshot.id);
    let outcome = backend
        .validate(ActionType::AddVmFromSnapshot, params.into(), user)
        .await
        .unwrap();
    assert_eq!(outcome.reason(), Some(EngineMessage::DiskSpaceLowOnStorageDomain));
}

#[tokio::test]
async fn test_missing_template_id_is_a_parameter_error() {
    let fx = Fixture::new();
    let (backend, _) = fx.scripted_backend();

    let err = backend
        .run_action(
            ActionType::AddVm,
            AddVmParameters::new("web", Guid::new_guid()).into(),
            Guid::new_guid(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::InvalidParameters {
            action: ActionType::AddVm,
            ..
        }
    ));
}

#[tokio::test]
async fn test_missing_template_disk_fails_validation() {
    let fx = Fixture::new();
    let (backend, tasks) = fx.scripted_backend();
    let cluster = fx.add_cluster().await;
    let domain = fx.add_domain(StorageDomainStatus::Active, u64::MAX).await;
    let base = fx.add_image(&domain, "base", ImageStatus::Ok).await;
    let mut template = fx.add_template(&[&base]).await;
    let gone = Guid::new_guid();
    template.disk_image_ids.push(gone);
    fx.repos.templates().upsert(template.clone()).await.unwrap();

    let params = AddVmParameters::new("web-02", cluster.id).template(template.id);
    let vm_id = params.vm_id;
    let err = backend
        .run_action(ActionType::AddVm, params.into(), Guid::new_guid())
        .await
        .unwrap_err();

    let outcome = err.validation_outcome().unwrap();
    assert_eq!(outcome.reason(), Some(EngineMessage::DiskNotExist));
    assert_eq!(outcome.variables, vec![format!("$diskIds {}", gone)]);
    assert!(fx.repos.vms().get(vm_id).await.is_err());
    assert_eq!(tasks.enqueued(), 0);
}

#[tokio::test]
async fn test_new_disk_ids_must_be_unique() {
    let fx = Fixture::new();
    let (backend, _) = fx.scripted_backend();
    let user = Guid::new_guid();
    let cluster = fx.add_cluster().await;
    let domain = fx.add_domain(StorageDomainStatus::Active, u64::MAX).await;

    let boot = NewDiskSpec::new("boot", 1 << 30);
    let mut twin = boot.clone();
    twin.alias = "twin".into();
    twin.disk_id = Guid::new_guid();
    let params = AddVmParameters::new("dup", cluster.id)
        .storage_domain(domain.id)
        .disk(boot)
        .disk(twin);
    let outcome = backend
        .validate(ActionType::AddVmFromScratch, params.into(), user)
        .await
        .unwrap();
    assert_eq!(outcome.reason(), Some(EngineMessage::DiskAlreadyExists));
    assert_eq!(outcome.variables, vec!["$diskAliases twin".to_string()]);

    // 与已有镜像冲突
    let existing = fx.add_image(&domain, "old", ImageStatus::Ok).await;
    let mut reused = NewDiskSpec::new("reused", 1 << 30);
    reused.image_id = existing.image_id;
    let params = AddVmParameters::new("dup", cluster.id)
        .storage_domain(domain.id)
        .disk(reused);
    let outcome = backend
        .validate(ActionType::AddVmFromScratch, params.into(), user)
        .await
        .unwrap();
    assert_eq!(outcome.reason(), Some(EngineMessage::DiskAlreadyExists));
}

#[tokio::test]
async fn test_failed_disk_insert_rolls_back_vm() {
    let fx = Fixture::new();
    let (backend, tasks) = fx.scripted_backend();
    let cluster = fx.add_cluster().await;
    let domain = fx.add_domain(StorageDomainStatus::Active, u64::MAX).await;
    let base = fx.add_image(&domain, "base", ImageStatus::Ok).await;
    let template = fx.add_template(&[&base]).await;
    fx.disk_images.reject_inserts();

    for action in [ActionType::AddVm, ActionType::AddVmFromTemplate] {
        let params = AddVmParameters::new("web-03", cluster.id).template(template.id);
        let vm_id = params.vm_id;
        let err = backend
            .run_action(action, params.into(), Guid::new_guid())
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Storage(_)));

        // 不留下半成品虚拟机
        assert!(fx.repos.vms().get(vm_id).await.is_err());
        assert!(fx.repos.vms().get_by_name("web-03").await.unwrap().is_none());
        assert!(fx.repos.vms().get_elements_for_vm(vm_id).await.unwrap().is_empty());
    }
    assert_eq!(tasks.enqueued(), 0);
    assert_eq!(fx.image_status(base.image_id).await, ImageStatus::Ok);
}
