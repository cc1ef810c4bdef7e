use proc_macro::TokenStream;

mod assets;

/// 在编译期嵌入匹配 glob 模式的模板文件，展开为 `tagforge::loader::InMemoryLoader`。
///
/// 模式相对于调用方 crate 的 `CARGO_MANIFEST_DIR`；模板名为相对于模式中
/// 首个通配符之前目录的路径，去掉扩展名，以 `/` 分隔。
///
/// ```ignore
/// let loader = tagforge::template_assets!("templates/**/*.tpl");
/// ```
#[proc_macro]
pub fn template_assets(input: TokenStream) -> TokenStream {
    assets::template_assets_impl(input)
}
