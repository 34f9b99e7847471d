use crate::manager::group::GroupManager;
use crate::manager::plugins::{BlockType, PluginMeta, PluginType, PluginsManager};
use crate::utils::image::{BuildImage, layout_columns, load_background, random_file, text_size};
use crate::utils::paths::image_path;
use anyhow::Result;
use plotters::style::RGBColor;
use std::sync::OnceLock;

const FONT_SIZE: u32 = 24;
const TITLE_SIZE: u32 = 30;
/// 卡片顶部留给标题的高度
const HEADER_HEIGHT: u32 = 50;
/// 整张图顶部留给说明文字的高度
const TOP_OFFSET: u32 = 110;
const GAP: u32 = 20;

const CARD_BG: RGBColor = RGBColor(167, 209, 252);
const BLOCKED_TEXT: RGBColor = RGBColor(252, 75, 13);
const STRIKE_LINE: RGBColor = RGBColor(236, 66, 7);
const NOTE_TEXT: RGBColor = RGBColor(231, 74, 57);
const WHITE: RGBColor = RGBColor(255, 255, 255);
const BLACK: RGBColor = RGBColor(0, 0, 0);

const TITLE_LINES: [&str; 2] = [
    "目前支持的功能列表:",
    "可以通过 ‘帮助[功能名称]’ 来获取对应功能的使用方法",
];
const NOTE: &str = "注: 红字代表功能被群管理员禁用，红线代表功能正在维护";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildType {
    /// 编号列表
    Normal,
    /// 每个功能一个方框
    VV,
}

impl BuildType {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("vv") {
            BuildType::VV
        } else {
            BuildType::Normal
        }
    }
}

/// 按菜单分类的一组插件
pub type MenuGroup = (&'static str, Vec<&'static PluginMeta>);

/// 帮助图片生成器，分类结果只计算一次
pub struct HelpImageBuild {
    plugin_type: PluginType,
    sort_data: OnceLock<Vec<MenuGroup>>,
}

/// 单个功能在图中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemState {
    /// 被群管理员禁用 (红字)
    pub group_blocked: bool,
    /// 全局禁用或被超级用户在本群禁用 (红线)
    pub maintained: bool,
}

pub fn item_state(
    gm: &GroupManager,
    pm: &PluginsManager,
    module: &str,
    group_id: Option<i64>,
) -> ItemState {
    let global = matches!(
        pm.get_plugin_block_type(module),
        Some(BlockType::All) | Some(BlockType::Group)
    );
    match group_id {
        Some(gid) => ItemState {
            group_blocked: !gm.get_plugin_status(module, gid),
            maintained: global || !gm.get_plugin_super_status(module, gid),
        },
        None => ItemState {
            group_blocked: false,
            maintained: global,
        },
    }
}

/// 按主菜单分类，保持插件注册顺序
pub fn sort_type<'a>(
    metas: impl IntoIterator<Item = &'a PluginMeta>,
    plugin_type: PluginType,
) -> Vec<(&'static str, Vec<&'a PluginMeta>)> {
    let mut groups: Vec<(&'static str, Vec<&'a PluginMeta>)> = Vec::new();
    for meta in metas.into_iter().filter(|m| m.plugin_type == plugin_type) {
        let menu = meta.main_menu();
        match groups.iter_mut().find(|(m, _)| *m == menu) {
            Some((_, list)) => list.push(meta),
            None => groups.push((menu, vec![meta])),
        }
    }
    groups
}

impl HelpImageBuild {
    pub const fn new(plugin_type: PluginType) -> Self {
        Self {
            plugin_type,
            sort_data: OnceLock::new(),
        }
    }

    pub fn sort_data(&self) -> &[MenuGroup] {
        self.sort_data.get_or_init(|| {
            sort_type(
                crate::plugins::get_plugins().iter().map(|p| &p.meta),
                self.plugin_type,
            )
        })
    }

    /// 生成帮助图片
    pub fn build_image(
        &self,
        gm: &GroupManager,
        pm: &PluginsManager,
        group_id: Option<i64>,
        build_type: BuildType,
    ) -> Result<BuildImage> {
        let menus: Vec<(&str, Vec<(&str, ItemState)>)> = self
            .sort_data()
            .iter()
            .map(|(menu, metas)| {
                let items = metas
                    .iter()
                    .map(|m| (m.name, item_state(gm, pm, m.module, group_id)))
                    .collect();
                (*menu, items)
            })
            .collect();
        render(&menus, build_type)
    }
}

/// 卡片正文高度，不含标题
fn body_height(count: usize, build_type: BuildType) -> u32 {
    match build_type {
        BuildType::VV => 50 * count as u32 + 10,
        BuildType::Normal => (FONT_SIZE + 6) * count as u32 + 10,
    }
}

fn column_count(cards: usize) -> usize {
    ((cards as f64).sqrt().ceil() as usize).max(1)
}

fn build_card(
    idx: usize,
    menu: &str,
    items: &[(&str, ItemState)],
    build_type: BuildType,
) -> Result<BuildImage> {
    let title = if menu == "normal" { "功能" } else { menu };
    let sum_height = body_height(items.len(), build_type);
    let max_width = items
        .iter()
        .map(|(name, _)| text_size(&format!("{}.{}", items.len(), name), FONT_SIZE).0)
        .chain(std::iter::once(text_size(title, TITLE_SIZE).0))
        .max()
        .unwrap_or(0)
        + 20;

    let even = idx % 2 == 0;
    let (body_bg, default_text) = if even { (WHITE, BLACK) } else { (BLACK, WHITE) };
    let mut body = BuildImage::new(max_width + 40, sum_height, body_bg);

    let mut curr_h = 10;
    for (i, (name, state)) in items.iter().enumerate() {
        let color = if state.group_blocked { BLOCKED_TEXT } else { default_text };
        let (name_w, name_h) = text_size(name, FONT_SIZE);
        match build_type {
            BuildType::VV => {
                let box_color = if even { BLACK } else { WHITE };
                body.rect((10, curr_h), ((max_width + 30) as i32, curr_h + 45), box_color, false)?;
                let x = ((max_width + 40) as i32 - name_w as i32) / 2;
                body.text((x.max(12), curr_h + 10), name, FONT_SIZE, color)?;
                if state.maintained {
                    let y = curr_h + 22;
                    body.line((x - 5, y), (x + name_w as i32 + 5, y), STRIKE_LINE, 3)?;
                }
                curr_h += 50;
            }
            BuildType::Normal => {
                body.text((10, curr_h), &format!("{}.{}", i + 1, name), FONT_SIZE, color)?;
                if state.maintained {
                    let y = curr_h + (name_h / 2) as i32 + 2;
                    body.line((7, y), (name_w as i32 + 35, y), STRIKE_LINE, 3)?;
                }
                curr_h += (FONT_SIZE + 5) as i32;
            }
        }
    }

    let mut card = BuildImage::new(max_width + 40, sum_height + HEADER_HEIGHT, CARD_BG);
    card.text_centered(14, title, TITLE_SIZE, BLACK)?;
    card.paste_build(&body, 0, HEADER_HEIGHT as i32);
    Ok(card)
}

/// 将各分类卡片按列排版到背景上
pub fn render(menus: &[(&str, Vec<(&str, ItemState)>)], build_type: BuildType) -> Result<BuildImage> {
    let cards = menus
        .iter()
        .enumerate()
        .map(|(idx, (menu, items))| build_card(idx, menu, items, build_type))
        .collect::<Result<Vec<_>>>()?;

    let heights: Vec<u32> = cards.iter().map(|c| c.height()).collect();
    let layout = layout_columns(&heights, column_count(cards.len()));

    let col_widths: Vec<u32> = layout
        .iter()
        .map(|col| col.iter().map(|&i| cards[i].width()).max().unwrap_or(0))
        .collect();
    let col_heights: Vec<u32> = layout
        .iter()
        .map(|col| col.iter().map(|&i| cards[i].height() + GAP).sum())
        .collect();

    let header_width = (text_size(NOTE, FONT_SIZE).0 + 310)
        .max(text_size(TITLE_LINES[1], FONT_SIZE).0 + 70);
    let width = (col_widths.iter().map(|w| w + GAP).sum::<u32>() + GAP).max(header_width);
    let height = TOP_OFFSET + col_heights.iter().copied().max().unwrap_or(0) + GAP;

    let mut canvas = BuildImage::new(width, height, RGBColor(236, 240, 241));
    let bg_dir = image_path().join("background").join("help").join("simple_help");
    if let Some(bg) = random_file(&bg_dir)
        && let Ok(img) = load_background(&bg, width, height, 5.0)
    {
        canvas.paste(&img, 0, 0);
    }

    let mut x = GAP as i32;
    for (col, width) in layout.iter().zip(&col_widths) {
        let mut y = TOP_OFFSET as i32;
        for &i in col {
            canvas.paste_build(&cards[i], x, y);
            y += (cards[i].height() + GAP) as i32;
        }
        x += (width + GAP) as i32;
    }

    canvas.text((10, 10), TITLE_LINES[0], FONT_SIZE, BLACK)?;
    canvas.text((60, 60), TITLE_LINES[1], FONT_SIZE, BLACK)?;
    canvas.text((300, 10), NOTE, FONT_SIZE, NOTE_TEXT)?;
    Ok(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_db;
    use tempfile::TempDir;

    const METAS: [PluginMeta; 4] = [
        PluginMeta::new("poke", "戳一戳"),
        PluginMeta {
            menu_type: &["一些工具"],
            ..PluginMeta::new("shop_log", "金币记录")
        },
        PluginMeta::new("word_bank", "词条"),
        PluginMeta {
            plugin_type: PluginType::Superuser,
            ..PluginMeta::new("gallery", "更新色图")
        },
    ];

    #[test]
    fn sort_groups_by_main_menu() {
        let groups = sort_type(&METAS, PluginType::Normal);
        let names: Vec<(&str, Vec<&str>)> = groups
            .iter()
            .map(|(menu, list)| (*menu, list.iter().map(|m| m.module).collect()))
            .collect();
        assert_eq!(
            names,
            vec![("normal", vec!["poke", "word_bank"]), ("一些工具", vec!["shop_log"])]
        );
        assert_eq!(sort_type(&METAS, PluginType::Superuser).len(), 1);
    }

    #[tokio::test]
    async fn item_state_reflects_group_and_global_blocks() {
        let dir = TempDir::new().unwrap();
        let gm = GroupManager::load(dir.path().join("g.json"));
        let db = test_db().await;
        let pm = PluginsManager::default();
        pm.load(&db, &METAS).await.unwrap();

        gm.block_plugin("poke", 1, false);
        assert_eq!(
            item_state(&gm, &pm, "poke", Some(1)),
            ItemState { group_blocked: true, maintained: false }
        );

        gm.block_plugin("word_bank:super", 1, false);
        assert!(item_state(&gm, &pm, "word_bank", Some(1)).maintained);

        pm.block_plugin(&db, "shop_log", BlockType::Private).await.unwrap();
        assert!(!item_state(&gm, &pm, "shop_log", None).maintained);
        pm.block_plugin(&db, "shop_log", BlockType::Group).await.unwrap();
        assert!(item_state(&gm, &pm, "shop_log", None).maintained);
    }

    #[test]
    fn cards_are_split_into_columns_by_height() {
        assert_eq!(body_height(2, BuildType::Normal), 70);
        let heights: Vec<u32> = [2, 1, 3]
            .iter()
            .map(|&n| body_height(n, BuildType::VV) + HEADER_HEIGHT)
            .collect();
        assert_eq!(heights, vec![160, 110, 210]);

        assert_eq!(column_count(1), 1);
        assert_eq!(column_count(3), 2);
        assert_eq!(column_count(9), 3);
        let layout = layout_columns(&heights, column_count(heights.len()));
        assert_eq!(layout, vec![vec![2], vec![0, 1]]);
    }

    #[test]
    fn render_lays_out_every_menu() {
        let state = ItemState::default();
        let menus = vec![
            ("normal", vec![("戳一戳", state), ("词条", ItemState { group_blocked: true, maintained: true })]),
            ("一些工具", vec![("金币记录", state)]),
        ];
        for build_type in [BuildType::Normal, BuildType::VV] {
            match render(&menus, build_type) {
                Ok(img) => {
                    assert!(img.width() > 300);
                    let cards = body_height(2, build_type) + HEADER_HEIGHT + GAP;
                    assert!(img.height() >= TOP_OFFSET + cards);
                }
                // 环境中没有可用字体
                Err(e) => assert!(e.to_string().contains("绘制文字失败")),
            }
        }
    }

    #[test]
    fn build_type_parsing() {
        assert_eq!(BuildType::parse("VV"), BuildType::VV);
        assert_eq!(BuildType::parse("normal"), BuildType::Normal);
    }
}
