use anyhow::Result;
use log::debug;

use super::attribute_number;
use crate::document::{DocumentSource, ElementId, ElementKind, Session};

/// Texture coordinate set feeding the bump map bound to `symbol` on an
/// `<instance_geometry>` or `<instance_controller>`.
///
/// Follows `instance_material -> material -> instance_effect -> effect ->
/// bump texture -> bind_vertex_input`. A bump texture whose texcoord has no
/// `<bind_vertex_input>` uses set 0. `None` when nothing on the chain
/// carries a bump map.
pub(super) fn bump_texcoord_set<S: DocumentSource>(
    session: &mut Session<S>,
    instance: ElementId,
    symbol: &str,
) -> Result<Option<u32>> {
    let Some(instance_material) = find_instance_material(session, instance, symbol) else {
        return Ok(None);
    };
    let Some(target) = session
        .graph()
        .get(instance_material)
        .attribute("target")
        .map(str::to_string)
    else {
        return Ok(None);
    };
    let Some(material) = session.resolve(instance_material, &target)? else {
        return Ok(None);
    };

    let Some(instance_effect) = session
        .graph()
        .first_child_of_kind(material, &ElementKind::InstanceEffect)
    else {
        return Ok(None);
    };
    let Some(url) = session
        .graph()
        .get(instance_effect)
        .attribute("url")
        .map(str::to_string)
    else {
        return Ok(None);
    };
    let Some(effect) = session.resolve(instance_effect, &url)? else {
        return Ok(None);
    };

    let graph = session.graph();
    let Some(texcoord) = graph
        .descendants(effect)
        .into_iter()
        .filter(|&element| *graph.kind(element) == ElementKind::Bump)
        .find_map(|bump| graph.first_child_of_kind(bump, &ElementKind::Texture))
        .and_then(|texture| graph.get(texture).attribute("texcoord"))
    else {
        return Ok(None);
    };

    let binding = graph
        .children_of_kind(instance_material, &ElementKind::BindVertexInput)
        .find(|&bind| graph.get(bind).attribute("semantic") == Some(texcoord));
    let set = match binding {
        Some(bind) => attribute_number(graph, bind, "input_set")?.unwrap_or(0),
        None => {
            debug!("bump texcoord {texcoord} of symbol {symbol} is unbound, using set 0");
            0
        }
    };
    Ok(Some(set))
}

fn find_instance_material<S: DocumentSource>(
    session: &Session<S>,
    instance: ElementId,
    symbol: &str,
) -> Option<ElementId> {
    let graph = session.graph();
    let bind_material = graph.first_child_of_kind(instance, &ElementKind::BindMaterial)?;
    let technique = graph.first_child_of_kind(bind_material, &ElementKind::TechniqueCommon)?;
    graph
        .children_of_kind(technique, &ElementKind::InstanceMaterial)
        .find(|&element| graph.get(element).attribute("symbol") == Some(symbol))
}
