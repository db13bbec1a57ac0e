use std::collections::BTreeMap;

/// 前缀树节点：每层一个字符，`ids` 只登记在完整单词的末端节点上。
#[derive(Clone, Debug)]
pub struct Node<Id> {
    children: BTreeMap<char, Node<Id>>,
    ids: Vec<Id>,
}

impl<Id> Default for Node<Id> {
    fn default() -> Self {
        Self {
            children: BTreeMap::new(),
            ids: Vec::new(),
        }
    }
}

impl<Id: Clone + PartialEq> Node<Id> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入单词，返回 true 表示创建了新的末端（之前没有任何 id 的单词）
    pub fn insert(&mut self, word: &str, id: Id) -> bool {
        let mut node = self;
        for ch in word.chars() {
            node = node.children.entry(ch).or_default();
        }
        let fresh = node.ids.is_empty();
        // ids 是集合语义，但保留插入顺序以保证结果稳定
        if !node.ids.contains(&id) {
            node.ids.push(id);
        }
        fresh
    }

    /// 前缀查找：逐字符下降，到达后收集本节点及全部子孙的 ids。
    /// 任一字符无对应子节点则直接返回空。
    pub fn collect_prefix(&self, word: &str) -> Vec<Id> {
        let mut node = self;
        for ch in word.chars() {
            match node.children.get(&ch) {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }
        let mut out = Vec::new();
        node.collect_into(&mut out);
        out
    }

    fn collect_into(&self, out: &mut Vec<Id>) {
        out.extend(self.ids.iter().cloned());
        for child in self.children.values() {
            child.collect_into(out);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty() && self.children.is_empty()
    }

    /// 节点总数（含根），用于统计
    pub fn node_count(&self) -> usize {
        1 + self.children.values().map(Node::node_count).sum::<usize>()
    }
}
