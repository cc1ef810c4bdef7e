use crate::error::Result;
use crate::runtime::expr::quote_literal;
use crate::tpl::compiler::Compiler;
use crate::tpl::node::{Element, NodeId, Position};
use crate::tpl::params::{ParamKind, ParamSpec};
use crate::tpl::registry::{Phase, Plugin, TagRegistry};

/// 内置标签：条件、循环、区块继承、包含与翻译
#[derive(Debug, Default, Clone, Copy)]
pub struct BasePlugin;

impl Plugin for BasePlugin {
    fn name(&self) -> &str {
        "base"
    }

    fn register(&self, tags: &mut TagRegistry) {
        tags.bind("if", Phase::Open, open_if)
            .bind("elseif", Phase::OpenClose, open_close_elseif)
            .bind("else", Phase::OpenClose, open_close_else)
            .bind("for", Phase::Open, open_for)
            .bind("foreach", Phase::Open, open_foreach)
            .bind("block", Phase::Open, open_block)
            .bind("block", Phase::Close, close_block)
            .bind("blockdef", Phase::Open, open_blockdef)
            .bind("blockdef", Phase::Close, close_blockdef)
            .bind("putblock", Phase::OpenClose, open_close_putblock)
            .bind("addblock", Phase::Open, open_addblock)
            .bind("addblock", Phase::Close, close_addblock)
            .bind("extends", Phase::OpenClose, open_close_extends)
            .bind("include", Phase::OpenClose, open_close_include)
            .bind("t", Phase::Render, render_t);
    }
}

const ID: [ParamSpec; 1] = [ParamSpec::required("id", ParamKind::Id)];

fn open_if(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(id, false, &[ParamSpec::required("cond", ParamKind::Expr)])?;
    let node = c.tree.get_mut(id);
    node.prefix = format!("if ({}) {{", node.param("cond"));
    node.suffix = "}".into();
    node.has_else = false;
    Ok(())
}

/// 检查节点是否直接位于 `if` 中，返回该 `if` 节点
fn enclosing_if(c: &Compiler<'_>, id: NodeId, message: &str) -> Result<NodeId> {
    match c.tree.get(id).parent {
        Some(parent) if c.tree.get(parent).tag() == "if" => Ok(parent),
        _ => Err(c.structural(id, message)),
    }
}

fn open_close_elseif(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(id, false, &[ParamSpec::required("cond", ParamKind::Expr)])?;
    let parent = enclosing_if(c, id, "elseif must be in a if block")?;
    if c.tree.get(parent).has_else {
        return Err(c.structural(id, "elseif can't be after the else"));
    }
    let node = c.tree.get_mut(id);
    node.prefix = format!("}} else if ({}) {{", node.param("cond"));
    Ok(())
}

fn open_close_else(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(id, false, &[])?;
    let parent = enclosing_if(c, id, "else must be in a if block")?;
    if c.tree.get(parent).has_else {
        return Err(c.structural(id, "if block already has an else"));
    }
    c.tree.get_mut(id).prefix = "} else {".into();
    c.tree.get_mut(parent).has_else = true;
    Ok(())
}

fn open_for(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(
        id,
        false,
        &[
            ParamSpec::required("var", ParamKind::Var),
            ParamSpec::required("to", ParamKind::Int),
            ParamSpec::optional("from", ParamKind::Int, "0"),
            ParamSpec::optional("step", ParamKind::Int, "1"),
        ],
    )?;
    let step: i64 = c.tree.get(id).param("step").parse().unwrap_or(0);
    if step == 0 {
        return Err(c.parameter_error(id, "Parameter 'step' must not be zero"));
    }
    let node = c.tree.get_mut(id);
    let var = node.param("var").to_string();
    let cmp = if step > 0 { "<=" } else { ">=" };
    node.prefix = format!(
        "for ({var} = {}; {var} {cmp} {}; {var} += {step}) {{",
        node.param("from"),
        node.param("to"),
    );
    node.suffix = "}".into();
    Ok(())
}

fn open_foreach(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(
        id,
        false,
        &[
            ParamSpec::required("list", ParamKind::Expr),
            ParamSpec::required("var", ParamKind::Var),
            ParamSpec::optional("key", ParamKind::Var, ""),
        ],
    )?;
    let node = c.tree.get_mut(id);
    node.prefix = match node.param("key") {
        "" => format!("foreach ({} as {}) {{", node.param("list"), node.param("var")),
        key => format!(
            "foreach ({} as {} => {}) {{",
            node.param("list"),
            key,
            node.param("var")
        ),
    };
    node.suffix = "}".into();
    Ok(())
}

fn block_id(c: &Compiler<'_>, id: NodeId) -> String {
    c.tree.get(id).param("id").to_string()
}

fn open_block(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(id, false, &ID)?;
    let key = block_id(c, id);
    if c.block(&key).is_none() {
        c.register_block(&key, id);
    }
    Ok(())
}

/// 较浅（更派生）的定义胜出：派生模板的区块别名到已注册内容，
/// 基模板的区块把已注册的派生内容接管过来
fn close_block(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    let key = block_id(c, id);
    let depth = c.depth();
    match c.block(&key) {
        Some(entry) if entry.node != id => {
            if entry.depth < depth {
                c.tree.set_alias(id, entry.node);
            } else {
                c.tree.set_alias(entry.node, id);
                c.register_block(&key, id);
            }
        }
        Some(_) => {}
        None => c.register_block(&key, id),
    }
    Ok(())
}

fn open_blockdef(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(id, false, &ID)
}

/// 定义处不输出任何内容：内容转移到快照节点，再由快照参与区块覆盖
fn close_blockdef(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    let key = block_id(c, id);
    let depth = c.depth();
    let snapshot = c.tree.snapshot(id);
    c.tree.clear(id);
    match c.block(&key) {
        None => c.register_block(&key, snapshot),
        Some(entry) if entry.depth >= depth => {
            c.tree.set_alias(entry.node, snapshot);
            c.register_block(&key, snapshot);
        }
        Some(entry) => c.tree.set_alias(snapshot, entry.node),
    }
    Ok(())
}

fn open_close_putblock(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(id, false, &ID)?;
    let key = block_id(c, id);
    match c.block(&key) {
        Some(entry) => c.tree.set_alias(id, entry.node),
        None => c.defer_block_ref(id),
    }
    Ok(())
}

fn addblock_position(c: &Compiler<'_>, id: NodeId) -> Result<Position> {
    c.tree
        .get(id)
        .param("position")
        .parse::<Position>()
        .map_err(|e| c.parameter_error(id, e))
}

fn open_addblock(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(
        id,
        false,
        &[
            ParamSpec::required("id", ParamKind::Id),
            ParamSpec::optional("position", ParamKind::String, "after"),
        ],
    )?;
    addblock_position(c, id)?;
    let key = block_id(c, id);
    if c.block(&key).is_none() {
        c.register_block(&key, id);
    }
    Ok(())
}

/// 把自身内容转移到已注册区块的指定位置
fn close_addblock(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    let key = block_id(c, id);
    let Some(entry) = c.block(&key) else {
        return Ok(());
    };
    if entry.node == id {
        return Ok(());
    }
    let position = addblock_position(c, id)?;
    let snapshot = c.tree.snapshot(id);
    c.tree.clear(id);

    let target = entry.node;
    match position {
        Position::After => {
            c.tree.push(target, Element::Text("\n".into()));
            c.tree.push(target, Element::Node(snapshot));
        }
        Position::Before => {
            c.tree.add(target, Element::Node(snapshot), Position::Before);
            c.tree.add(target, Element::Text("\n".into()), Position::Index(1));
        }
        Position::Index(_) => c.tree.add(target, Element::Node(snapshot), position),
    }
    Ok(())
}

const NAME: [ParamSpec; 1] = [ParamSpec::required("name", ParamKind::String)
    .or_fail("Required name of the template to extend")];

fn open_close_extends(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(id, false, &NAME)?;
    let name = c.tree.get(id).param("name").to_string();
    let root = c.parse_file(&name, Some(id))?;
    c.set_root(root);
    Ok(())
}

fn open_close_include(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(
        id,
        false,
        &[ParamSpec::required("name", ParamKind::String)
            .or_fail("Required name of the template to include")],
    )?;
    let name = c.tree.get(id).param("name").to_string();
    let root = c.parse_file(&name, Some(id))?;
    c.tree.clear(id);
    c.tree.push(id, Element::Node(root));
    Ok(())
}

/// 主体为纯文本时折叠为常量翻译，否则在运行时缓冲输出后再翻译
fn render_t(c: &mut Compiler<'_>, id: NodeId) -> Result<()> {
    c.check_params(id, false, &[])?;
    let id = c.tree.resolve(id);
    match c.tree.literal(id) {
        Some(text) => {
            c.tree.clear(id);
            c.tree
                .push(id, Element::Code(format!("echo _({});", quote_literal(&text))));
        }
        None => {
            let node = c.tree.get_mut(id);
            node.prefix = "ob_start();".into();
            node.suffix = "echo _(ob_get_clean());".into();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateError;
    use crate::loader::InMemoryLoader;
    use crate::tpl::codegen;
    use std::sync::Arc;

    fn compile(templates: &[(&str, &str)], name: &str) -> Result<String> {
        let loader = InMemoryLoader::from_assets(templates);
        let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(BasePlugin)];
        let registry = Arc::new(TagRegistry::from_plugins(&plugins));
        let mut compiler = Compiler::new(&loader, registry);
        let parsed = compiler.parse_template(name)?;
        codegen::generate(&mut compiler, parsed.root, true)
    }

    fn one(source: &str) -> Result<String> {
        compile(&[("page", source)], "page")
    }

    #[test]
    fn test_if_chain() {
        assert_eq!(
            one(r#"{if cond="$a > 1"}x{elseif cond=$b}y{else}z{/if}"#).unwrap(),
            "<?if ($a > 1) {?>x<?} else if ($b) {?>y<?} else {?>z<?}?>"
        );
    }

    #[test]
    fn test_if_structure_errors() {
        let err = one("{if cond=$a}{else}{elseif cond=$b}{/if}").unwrap_err();
        assert!(err.to_string().ends_with("elseif can't be after the else"));
        let err = one("{elseif cond=$b}").unwrap_err();
        assert!(matches!(err, TemplateError::Structural { .. }));
        let err = one("{for var=$i to=1}{else}{/for}").unwrap_err();
        assert!(err.to_string().ends_with("else must be in a if block"));
    }

    #[test]
    fn test_for_loop() {
        assert_eq!(
            one("{for var=$i from=0 to=2}X{/for}").unwrap(),
            "<?for ($i = 0; $i <= 2; $i += 1) {?>X<?}?>"
        );
        assert_eq!(
            one("{for var=$i from=3 to=1 step=-1}{/for}").unwrap(),
            "<?for ($i = 3; $i >= 1; $i += -1) {}?>"
        );
        assert!(matches!(
            one("{for var=$i to=2 step=0}{/for}").unwrap_err(),
            TemplateError::ParameterType { .. }
        ));
    }

    #[test]
    fn test_foreach() {
        assert_eq!(
            one("{foreach list=$items key=$k var=$v}{$k}{/foreach}").unwrap(),
            "<?foreach ($items as $k => $v) {echo $k;}?>"
        );
    }

    #[test]
    fn test_block_override() {
        let templates = [
            ("base", "<{block id=x}A{/block}>"),
            ("child", "{extends name=base}{blockdef id=x}B{/blockdef}"),
        ];
        assert_eq!(compile(&templates, "child").unwrap(), "<B>");
        assert_eq!(compile(&templates, "base").unwrap(), "<A>");
    }

    #[test]
    fn test_block_override_through_two_levels() {
        let templates = [
            ("base", "[{block id=x}A{/block}]"),
            ("mid", "{extends name=base}{blockdef id=x}M{/blockdef}"),
            ("leaf", "{extends name=mid}{blockdef id=x}L{/blockdef}"),
        ];
        assert_eq!(compile(&templates, "leaf").unwrap(), "[L]");
        assert_eq!(compile(&templates, "mid").unwrap(), "[M]");
    }

    #[test]
    fn test_putblock_before_and_after_definition() {
        let templates = [("page", "{putblock id=x}|{block id=x}A{/block}|{putblock id=x}")];
        assert_eq!(compile(&templates, "page").unwrap(), "A|A|A");

        let err = one("{putblock id=nope}").unwrap_err();
        assert!(err.to_string().ends_with("unknown block 'nope'"));
    }

    #[test]
    fn test_addblock_order() {
        let templates = [
            ("base", "{block id=s}S{/block}"),
            (
                "child",
                "{extends name=base}{addblock id=s}1{/addblock}{addblock id=s}2{/addblock}{addblock id=s position=before}0{/addblock}",
            ),
        ];
        assert_eq!(compile(&templates, "child").unwrap(), "0\nS\n1\n2");
    }

    #[test]
    fn test_addblock_bad_position() {
        assert!(matches!(
            one("{addblock id=s position=middle}x{/addblock}").unwrap_err(),
            TemplateError::ParameterType { .. }
        ));
    }

    #[test]
    fn test_include() {
        let templates = [
            ("page", "a{include name=part}c"),
            ("part", "{if cond=$x}b{/if}"),
        ];
        assert_eq!(
            compile(&templates, "page").unwrap(),
            "a<?if ($x) {?>b<?}?>c"
        );
        let err = one("{include}").unwrap_err();
        assert!(matches!(err, TemplateError::MissingParameter { .. }));
    }

    #[test]
    fn test_extends_cycle() {
        let templates = [
            ("a", "{extends name=b}"),
            ("b", "{extends name=a}"),
        ];
        match compile(&templates, "a").unwrap_err() {
            TemplateError::Cycle { chain, tag, .. } => {
                assert_eq!(chain, vec!["a", "b", "a"]);
                assert_eq!(tag, "extends");
            }
            other => panic!("Expected Cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_translation_folding() {
        assert_eq!(one("{t}static text{/t}").unwrap(), "<?echo _('static text');?>");
        assert_eq!(
            one("{t}Hi {$name}{/t}").unwrap(),
            "<?ob_start();?>Hi <?echo $name;echo _(ob_get_clean());?>"
        );
    }
}
