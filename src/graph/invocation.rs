use crate::ir::{BootstrapArgument, CallKind, CallSite, DynamicCallSite, InstructionKind, Method};

const LAMBDA_METAFACTORY: &str = "java/lang/invoke/LambdaMetafactory";
const METAFACTORY: &str = "metafactory";
const METAFACTORY_DESCRIPTOR: &str = "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodType;Ljava/lang/invoke/MethodHandle;Ljava/lang/invoke/MethodType;)Ljava/lang/invoke/CallSite;";

/// Call sites of `method` in code order.
///
/// With `unwrap_lambdas`, a `LambdaMetafactory.metafactory` call site is
/// reported as a direct call to its implementation method. Any other
/// `invokedynamic` is dropped.
pub(crate) fn call_sites(method: &Method, unwrap_lambdas: bool) -> Vec<CallSite> {
    method
        .instructions
        .iter()
        .filter_map(|instruction| match &instruction.kind {
            InstructionKind::Invoke(site) => Some(site.clone()),
            InstructionKind::InvokeDynamic(site) if unwrap_lambdas => lambda_target(site),
            InstructionKind::InvokeDynamic(_) => None,
        })
        .collect()
}

fn lambda_target(site: &DynamicCallSite) -> Option<CallSite> {
    let bootstrap = &site.bootstrap;
    if bootstrap.owner != LAMBDA_METAFACTORY
        || bootstrap.name != METAFACTORY
        || bootstrap.descriptor != METAFACTORY_DESCRIPTOR
        || site.arguments.len() != 3
    {
        return None;
    }
    let BootstrapArgument::MethodHandle(handle) = &site.arguments[1] else {
        return None;
    };
    let kind = CallKind::from_handle_kind(handle.kind).ok()?;
    Some(CallSite {
        owner: handle.owner.clone(),
        name: handle.name.clone(),
        descriptor: handle.descriptor.clone(),
        kind,
        is_interface: handle.is_interface,
    })
}
