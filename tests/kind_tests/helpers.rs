//! Shared setup for kind tests

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, CustomResourceExt, ResourceExt};

use fleetroll::crd::{NodeReplacement, NodeRollout};
use fleetroll::store::FIELD_MANAGER;

/// Connect to the current cluster and make sure both CRDs are installed
pub async fn ensure_test_cluster() -> Result<Client, kube::Error> {
    let client = Client::try_default().await?;
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [NodeRollout::crd(), NodeReplacement::crd()] {
        crds.patch(&crd.name_any(), &params, &Patch::Apply(&crd))
            .await?;
    }
    // Give the API server a moment to serve the new kinds
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    Ok(client)
}
