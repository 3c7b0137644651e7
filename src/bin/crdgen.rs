use kube::CustomResourceExt;
use relaymq_k8s::crd::{RelayBroker, RelayBrokerScaleDown};

fn main() {
    print!("{}", serde_yaml::to_string(&RelayBroker::crd()).unwrap());
    println!("---");
    print!(
        "{}",
        serde_yaml::to_string(&RelayBrokerScaleDown::crd()).unwrap()
    );
}
